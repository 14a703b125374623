//! Authoritative zone data and longest-suffix zone lookup.

use crate::config::{normalize_name, ZoneConfig};
use crate::error::Error;
use std::collections::HashMap;
use std::net::Ipv4Addr;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// One zone. Immutable once built: alias cycle detection during resolution
/// keeps its own per-query state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub apex: String,
    pub serial: u32,
    pub primary_ns: String,
    /// Admin mailbox in domain form (`@` replaced by `.`).
    pub admin: String,
    pub ttl: u32,
    pub nameservers: Vec<String>,
    pub a: HashMap<String, Vec<Ipv4Addr>>,
    pub cname: HashMap<String, String>,
    pub txt: HashMap<String, Vec<String>>,
    /// Exchange and priority, sorted by exchange name.
    pub mx: Vec<(String, u16)>,
}

impl Zone {
    /// Build a zone from configuration, normalizing and validating every name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for names that can't be encoded on the wire.
    pub fn from_config(config: &ZoneConfig) -> Result<Self, Error> {
        let apex = valid_name(&normalize_name(&config.domain))?;
        let in_zone = |key: &str| qualify(key, &apex);

        let mut mx = config
            .mx
            .iter()
            .map(|(exchange, priority)| Ok((valid_name(&normalize_name(exchange))?, *priority)))
            .collect::<Result<Vec<_>, Error>>()?;
        mx.sort();

        Ok(Zone {
            serial: config.serial,
            primary_ns: valid_name(&normalize_name(&config.primary_ns))?,
            admin: valid_name(&normalize_name(&config.ns_admin.replace('@', ".")))?,
            ttl: config.ttl,
            nameservers: config
                .nameservers
                .iter()
                .map(|ns| valid_name(&normalize_name(ns)))
                .collect::<Result<_, _>>()?,
            a: config
                .a
                .iter()
                .map(|(name, addrs)| Ok((in_zone(name)?, addrs.clone())))
                .collect::<Result<_, Error>>()?,
            cname: config
                .cname
                .iter()
                .map(|(name, target)| Ok((in_zone(name)?, in_zone(target)?)))
                .collect::<Result<_, Error>>()?,
            txt: config
                .txt
                .iter()
                .map(|(name, values)| Ok((in_zone(name)?, values.clone())))
                .collect::<Result<_, Error>>()?,
            mx,
            apex,
        })
    }

    /// Whether `name` (already lowercased) is the apex or below it.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        name == self.apex
            || name
                .strip_suffix(self.apex.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
    }

    #[must_use]
    pub fn is_apex(&self, name: &str) -> bool {
        name == self.apex
    }

    #[must_use]
    pub fn alias(&self, name: &str) -> Option<&str> {
        self.cname.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn addresses(&self, name: &str) -> &[Ipv4Addr] {
        self.a.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn texts(&self, name: &str) -> &[String] {
        self.txt.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Resolve a configured record key against the zone apex.
fn qualify(key: &str, apex: &str) -> Result<String, Error> {
    let key = normalize_name(key);
    let name = if key.is_empty() || key == "@" {
        apex.to_string()
    } else if key == apex || key.ends_with(&format!(".{apex}")) {
        key
    } else {
        format!("{key}.{apex}")
    };
    valid_name(&name)
}

fn valid_name(name: &str) -> Result<String, Error> {
    if name.is_empty() {
        return Err(Error::InvalidName(name.to_string(), "empty name"));
    }
    if name.split('.').any(str::is_empty) {
        return Err(Error::InvalidName(name.to_string(), "empty label"));
    }
    if name.split('.').any(|label| label.len() > MAX_LABEL_LEN) {
        return Err(Error::InvalidName(name.to_string(), "label longer than 63 bytes"));
    }
    if crate::dns::wire::name_len(name) > MAX_NAME_LEN {
        return Err(Error::InvalidName(name.to_string(), "name longer than 255 bytes"));
    }
    Ok(name.to_string())
}

/// All configured zones, keyed by apex.
#[derive(Debug, Clone, Default)]
pub struct ZoneStore {
    zones: HashMap<String, Zone>,
}

impl ZoneStore {
    /// # Errors
    ///
    /// Returns [`Error::DuplicateZone`] when two zones share an apex, or any
    /// error from [`Zone::from_config`].
    pub fn from_config(configs: &[ZoneConfig]) -> Result<Self, Error> {
        let mut zones = HashMap::with_capacity(configs.len());
        for config in configs {
            let zone = Zone::from_config(config)?;
            if zones.contains_key(&zone.apex) {
                return Err(Error::DuplicateZone(zone.apex));
            }
            zones.insert(zone.apex.clone(), zone);
        }
        Ok(ZoneStore { zones })
    }

    /// The most specific zone containing `name` (already lowercased).
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Zone> {
        let mut candidate = name;
        loop {
            if let Some(zone) = self.zones.get(candidate) {
                return Some(zone);
            }
            candidate = candidate.split_once('.')?.1;
        }
    }

    pub fn apexes(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone_config(domain: &str) -> ZoneConfig {
        serde_json::from_value(serde_json::json!({
            "domain": domain,
            "primary_ns": format!("ns1.{domain}"),
            "ns_admin": format!("hostmaster@{domain}"),
            "serial": 1,
        }))
        .unwrap()
    }

    #[test]
    fn qualifies_record_names() {
        let mut config = zone_config("Example.Local.");
        config.a.insert("@".into(), vec![Ipv4Addr::new(10, 0, 0, 1)]);
        config.a.insert("WWW".into(), vec![Ipv4Addr::new(10, 0, 0, 2)]);
        config.a.insert("api.example.local".into(), vec![Ipv4Addr::new(10, 0, 0, 3)]);
        config.cname.insert("blog".into(), "www".into());

        let zone = Zone::from_config(&config).unwrap();
        assert_eq!(zone.apex, "example.local");
        assert_eq!(zone.admin, "hostmaster.example.local");
        assert_eq!(zone.addresses("example.local"), &[Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(zone.addresses("www.example.local"), &[Ipv4Addr::new(10, 0, 0, 2)]);
        assert_eq!(zone.addresses("api.example.local"), &[Ipv4Addr::new(10, 0, 0, 3)]);
        assert_eq!(zone.alias("blog.example.local"), Some("www.example.local"));
        assert!(zone.addresses("nope.example.local").is_empty());
    }

    #[test]
    fn rejects_unencodable_names() {
        let mut config = zone_config("example.local");
        config.txt.insert("a".repeat(64), vec![]);
        assert!(matches!(
            Zone::from_config(&config),
            Err(Error::InvalidName(_, _))
        ));

        let config = zone_config("bad..local");
        assert!(Zone::from_config(&config).is_err());
    }

    #[test]
    fn contains_requires_label_boundary() {
        let zone = Zone::from_config(&zone_config("example.local")).unwrap();
        assert!(zone.contains("example.local"));
        assert!(zone.contains("a.b.example.local"));
        assert!(!zone.contains("badexample.local"));
        assert!(zone.is_apex("example.local"));
        assert!(!zone.is_apex("www.example.local"));
    }

    #[test]
    fn longest_suffix_wins() {
        let store = ZoneStore::from_config(&[
            zone_config("example.local"),
            zone_config("lab.example.local"),
        ])
        .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.find("www.example.local").unwrap().apex, "example.local");
        assert_eq!(
            store.find("host.lab.example.local").unwrap().apex,
            "lab.example.local"
        );
        assert_eq!(store.find("lab.example.local").unwrap().apex, "lab.example.local");
        assert!(store.find("example.test").is_none());
        assert!(store.find("").is_none());
    }

    #[test]
    fn duplicate_zone() {
        let configs = [zone_config("example.local"), zone_config("EXAMPLE.local")];
        let err = ZoneStore::from_config(&configs).unwrap_err();
        assert!(matches!(err, Error::DuplicateZone(apex) if apex == "example.local"));
    }
}
