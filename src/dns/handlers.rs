use crate::dns::message::{Caa, RData, Record, Request, ResponseWriter, Soa, OPT_LEN};
use crate::dns::wire::{encode_name, Header, Question, Rcode, RecordType};
use crate::dns::zone::{Zone, ZoneStore};
use crate::registry::{DynCaaProvider, DynTxtProvider};
use std::collections::HashSet;
use std::sync::Arc;

/// Label prefixing names that carry DNS-01 challenge values.
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Label between the provider and the zone apex in DKIM key names.
pub const DKIM_LABEL: &str = "_domainkey";

/// SOA refresh, retry, expire and minimum are all fixed at one minute.
const SOA_TIMER: u32 = 60;

/// Optional dynamic record sources. `None` disables the feature.
#[derive(Clone, Default)]
pub struct Providers {
    pub acme_txt: Option<DynTxtProvider>,
    pub acme_caa: Option<DynCaaProvider>,
    pub dkim: Option<DynTxtProvider>,
}

/// Answers queries from local zone data.
#[derive(Clone)]
pub struct Handler {
    zones: Arc<ZoneStore>,
    providers: Providers,
}

impl Handler {
    #[must_use]
    pub fn new(zones: Arc<ZoneStore>, providers: Providers) -> Self {
        Handler { zones, providers }
    }

    #[must_use]
    pub fn zones(&self) -> &ZoneStore {
        &self.zones
    }

    /// Whether the query name falls inside a local zone.
    #[must_use]
    pub fn is_local(&self, request: &Request) -> bool {
        self.zones.find(&request.question.name).is_some()
    }

    /// Build the complete response to `request`.
    ///
    /// Queries outside every zone get REFUSED; the caller decides beforehand
    /// whether they should have been forwarded instead. `query_id` is the
    /// server's internal query counter, which drives answer rotation.
    pub async fn respond(
        &self,
        request: &Request,
        query_id: u64,
        recursion_available: bool,
    ) -> Vec<u8> {
        let max_len = request.max_len();
        let mut header = Header::response_to(&request.header);
        header.ra = recursion_available;

        let mut writer = ResponseWriter::new(header, max_len);
        if request.edns_payload.is_some() {
            writer.reserve(OPT_LEN);
        }
        writer.put_question(&request.question);

        let rcode = match self.zones.find(&request.question.name) {
            Some(zone) => {
                writer.header_mut().aa = true;
                self.resolve(zone, query_id, &request.question, &mut writer)
                    .await
            }
            None => Rcode::Refused,
        };
        writer.set_rcode(rcode);

        if request.edns_payload.is_some() {
            // max_len is clamped to MAX_UDP_LEN, well inside u16.
            #[allow(clippy::cast_possible_truncation)]
            writer.put_opt(max_len as u16);
        }
        writer.finish()
    }

    /// Append the answer section for `question` inside `zone`.
    pub async fn resolve(
        &self,
        zone: &Zone,
        query_id: u64,
        question: &Question,
        writer: &mut ResponseWriter,
    ) -> Rcode {
        let name = question.name.as_str();
        let owner = question.wire_name.clone();

        match question.qtype {
            RecordType::SOA => Self::answer_soa(zone, name, owner, writer),
            RecordType::NS if zone.is_apex(name) => {
                let records = rotated(&zone.nameservers, query_id)
                    .map(|ns| RData::Ns(ns.clone()));
                put_all(writer, &owner, zone.ttl, records);
                Rcode::NoError
            }
            RecordType::MX if zone.is_apex(name) => {
                let records = zone.mx.iter().map(|(exchange, preference)| RData::Mx {
                    preference: *preference,
                    exchange: exchange.clone(),
                });
                put_all(writer, &owner, zone.ttl, records);
                Rcode::NoError
            }
            RecordType::CAA => {
                self.answer_caa(zone, name, owner, writer).await;
                Rcode::NoError
            }
            qtype => self.answer_chased(zone, query_id, qtype, name, owner, writer).await,
        }
    }

    fn answer_soa(zone: &Zone, name: &str, owner: Vec<u8>, writer: &mut ResponseWriter) -> Rcode {
        if !zone.is_apex(name) {
            return Rcode::NxDomain;
        }
        writer.put_answer(&Record {
            owner,
            ttl: zone.ttl,
            data: RData::Soa(Soa {
                mname: zone.primary_ns.clone(),
                rname: zone.admin.clone(),
                serial: zone.serial,
                refresh: SOA_TIMER,
                retry: SOA_TIMER,
                expire: SOA_TIMER,
                minimum: SOA_TIMER,
            }),
        });
        Rcode::NoError
    }

    async fn answer_caa(
        &self,
        zone: &Zone,
        name: &str,
        owner: Vec<u8>,
        writer: &mut ResponseWriter,
    ) {
        let mut records = match &self.providers.acme_caa {
            Some(provider) => provider.caa(name).await,
            None => Vec::new(),
        };
        if records.is_empty() {
            records.push(Caa::deny_all());
        }
        put_all(writer, &owner, zone.ttl, records.into_iter().map(RData::Caa));
    }

    /// Follow aliases from `name`, then answer `qtype` at wherever the chain ends.
    async fn answer_chased(
        &self,
        zone: &Zone,
        query_id: u64,
        qtype: RecordType,
        name: &str,
        mut owner: Vec<u8>,
        writer: &mut ResponseWriter,
    ) -> Rcode {
        let mut current = name;
        let mut visited = HashSet::new();
        while let Some(target) = zone.alias(current) {
            if !visited.insert(current) {
                tracing::debug!("alias cycle at \"{current}\" resolving \"{name}\"");
                return Rcode::ServFail;
            }
            let written = writer.put_answer(&Record {
                owner,
                ttl: zone.ttl,
                data: RData::Cname(target.to_string()),
            });
            if !written || qtype == RecordType::CNAME {
                return Rcode::NoError;
            }
            current = target;
            owner = encode_name(target);
        }

        match qtype {
            RecordType::A => {
                let records =
                    rotated(zone.addresses(current), query_id).map(|addr| RData::A(*addr));
                put_all(writer, &owner, zone.ttl, records);
            }
            RecordType::TXT => {
                let values = self.txt_values(zone, current).await;
                put_all(writer, &owner, zone.ttl, values.into_iter().map(RData::Txt));
            }
            _ => {}
        }
        Rcode::NoError
    }

    /// Static TXT values, else a pending ACME challenge, else a DKIM key.
    async fn txt_values(&self, zone: &Zone, name: &str) -> Vec<String> {
        let values = zone.texts(name);
        if !values.is_empty() {
            return values.to_vec();
        }

        let acme = self.providers.acme_txt.as_ref();
        if let (Some(acme), Some(domain)) = (acme, acme_challenge_domain(name)) {
            return acme.txt(domain).await;
        }

        let dkim = self.providers.dkim.as_ref();
        if let (Some(dkim), Some(provider)) = (dkim, dkim_provider(name, &zone.apex)) {
            return dkim
                .txt(provider)
                .await
                .into_iter()
                .take(1)
                .map(|key| format!("v=DKIM1;k=rsa;p={key}"))
                .collect();
        }

        Vec::new()
    }
}

fn acme_challenge_domain(name: &str) -> Option<&str> {
    name.strip_prefix(ACME_CHALLENGE_LABEL)?.strip_prefix('.')
}

/// `<provider>._domainkey.<apex>` yields `<provider>`.
fn dkim_provider<'a>(name: &'a str, apex: &str) -> Option<&'a str> {
    let provider = name
        .strip_suffix(apex)?
        .strip_suffix('.')?
        .strip_suffix(DKIM_LABEL)?
        .strip_suffix('.')?;
    (!provider.is_empty()).then_some(provider)
}

/// Iterate `items` starting at `query_id mod len`, wrapping around.
fn rotated<T>(items: &[T], query_id: u64) -> impl Iterator<Item = &T> {
    let start = match items.len() {
        0 => 0,
        // The remainder is smaller than len, so it fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        len => (query_id % len as u64) as usize,
    };
    items[start..].iter().chain(items[..start].iter())
}

/// Write answers until one doesn't fit.
fn put_all(
    writer: &mut ResponseWriter,
    owner: &[u8],
    ttl: u32,
    records: impl IntoIterator<Item = RData>,
) {
    for data in records {
        let record = Record {
            owner: owner.to_vec(),
            ttl,
            data,
        };
        if !writer.put_answer(&record) {
            break;
        }
    }
}
