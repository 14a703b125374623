use crate::error::Error;
use ipnetwork::IpNetwork;
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub type SharedConfig = Arc<Config>;

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub dns_bind_addrs: Vec<SocketAddr>,
    #[serde(default)]
    pub api_bind_addr: Option<SocketAddr>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_api_timeout")]
    pub api_timeout: Duration,
    #[serde(default)]
    pub forwarders: Vec<SocketAddr>,
    #[serde(default)]
    pub forward_for: Vec<IpNetwork>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout: Duration,
    #[serde(default = "default_forward_queue_depth")]
    pub forward_queue_depth: usize,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub acme: Option<AcmeConfig>,
    #[serde(default)]
    pub dkim: Option<DkimConfig>,
}

/// Static data for one zone. Record names may be `@`, relative to the apex,
/// or already below it.
#[derive(Deserialize, Debug, Clone)]
pub struct ZoneConfig {
    pub domain: String,
    pub primary_ns: String,
    pub ns_admin: String,
    pub serial: u32,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default)]
    pub a: HashMap<String, Vec<Ipv4Addr>>,
    #[serde(default)]
    pub cname: HashMap<String, String>,
    #[serde(default)]
    pub txt: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub mx: HashMap<String, u16>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AcmeConfig {
    pub bind_addr: SocketAddr,
    #[serde(default = "default_caa_issuers")]
    pub caa_issuers: Vec<String>,
    /// Networks allowed to register challenges, and for which domains. Absent
    /// means any peer that can reach the private listener may register.
    #[serde(default)]
    pub acl: Option<HashMap<IpNetwork, HashSet<String>>>,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct DkimConfig {
    pub bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_dkim_refresh")]
    pub refresh_interval: Duration,
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_forward_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_forward_queue_depth() -> usize {
    64
}

fn default_ttl() -> u32 {
    60
}

fn default_caa_issuers() -> Vec<String> {
    vec!["letsencrypt.org".to_string()]
}

fn default_dkim_refresh() -> Duration {
    Duration::from_secs(60)
}

lazy_static! {
    // NOTE(XXX): Once the "ip" feature has stabilized we can use Ipv6Addr.is_unique_local[0].
    //            Presently this feature is unstable so we home-roll. See also RFC 4193[1].
    // [0]: https://doc.rust-lang.org/std/net/struct.Ipv6Addr.html#method.is_unique_local
    // [1]: https://www.rfc-editor.org/rfc/rfc4193.html
    static ref IPV6_UNIQUE_LOCAL_NETWORK: IpNetwork = IpNetwork::from_str("fc00::/7").unwrap();
}

impl Config {
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.validate()?;
        Ok(conf)
    }

    fn validate(&self) -> Result<(), Error> {
        if let Some(addr) = self.api_bind_addr {
            bind_addr_is_secure(addr)?;
        }
        if let Some(acme) = &self.acme {
            bind_addr_is_secure(acme.bind_addr)?;
        }
        if let Some(dkim) = &self.dkim {
            bind_addr_is_secure(dkim.bind_addr)?;
        }
        Ok(())
    }

    /// Whether out-of-zone queries from `source_ip` may be forwarded upstream.
    pub fn forward_permitted(&self, source_ip: IpAddr) -> bool {
        !self.forwarders.is_empty()
            && self
                .forward_for
                .iter()
                .any(|network| network.contains(normalize_ip(source_ip)))
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let conf: Config = serde_json::from_str(s)?;
        conf.validate()?;
        Ok(conf)
    }
}

impl AcmeConfig {
    pub fn update_permitted(&self, source_ip: IpAddr, domain: &str) -> bool {
        let Some(acl) = &self.acl else {
            return true;
        };
        let source_ip = normalize_ip(source_ip);
        acl.iter().any(|(allowed_network, allowed_domains)| {
            allowed_network.contains(source_ip)
                && allowed_domains
                    .iter()
                    .any(|allowed| is_same_or_subdomain(domain, allowed))
        })
    }
}

/// Lowercase and drop the trailing dot.
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn is_same_or_subdomain(domain: &str, parent: &str) -> bool {
    let parent = normalize_name(parent);
    domain == parent
        || domain
            .strip_suffix(parent.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
}

// Dual-stack sockets report IPv4 peers as mapped IPv6 addresses.
fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

fn bind_addr_is_secure(addr: SocketAddr) -> Result<(), Error> {
    match addr {
        SocketAddr::V4(v4_addr) => {
            let ip = v4_addr.ip();
            if !ip.is_loopback() && !ip.is_private() {
                return Err(Error::InsecureBind(IpAddr::V4(*ip)));
            }
            Ok(())
        }
        SocketAddr::V6(v6_addr) => {
            let ip = v6_addr.ip();
            if !ip.is_loopback() && !IPV6_UNIQUE_LOCAL_NETWORK.contains(IpAddr::V6(*ip)) {
                return Err(Error::InsecureBind(IpAddr::V6(*ip)));
            }
            Ok(())
        }
    }
}
