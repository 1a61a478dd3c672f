//! `/etc/igmpproxy.conf` parsing.
//!
//! Recognised directives: `phyint <name> <upstream|downstream|disabled>
//! [ratelimit N] [threshold N] [altnet A/M]* [whitelist A/M]*` and
//! `quickleave`. This is a hand-rolled line/token tokenizer — the grammar
//! is five keywords, the same weight class as
//! smoltcp's own small hand-written wire parsers (`src/wire/*.rs` upstream),
//! not worth pulling in a parser-combinator crate for.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::core::iface::Role;
pub use crate::error::ConfigError;

/// Defaults from `igmpproxy.h`: `DEFAULT_ROBUSTNESS`, `DEFAULT_THRESHOLD`,
/// `DEFAULT_RATELIMIT`, `INTERVAL_QUERY`, `INTERVAL_QUERY_RESPONSE`.
pub const DEFAULT_ROBUSTNESS: u32 = 2;
pub const DEFAULT_THRESHOLD: u8 = 1;
pub const DEFAULT_RATELIMIT: u32 = 0;
pub const DEFAULT_QUERY_INTERVAL_SECS: u32 = 125;
pub const DEFAULT_QUERY_RESPONSE_INTERVAL_SECS: u32 = 10;
pub const DEFAULT_STARTUP_QUERY_COUNT: u32 = DEFAULT_ROBUSTNESS;
/// `startup_query_interval` defaults to `query_interval / 4`.
pub const DEFAULT_LAST_MEMBER_QUERY_INTERVAL_DS: u32 = 10;
pub const DEFAULT_LAST_MEMBER_QUERY_COUNT: u32 = DEFAULT_ROBUSTNESS;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/igmpproxy.conf";

/// An `A.B.C.D/M` subnet, used for `altnet`/`whitelist` qualifiers and for
/// `is_address_valid_for` (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Net {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        Ipv4Net { addr, prefix }
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = self.mask();
        (u32::from(addr) & mask) == (u32::from(self.addr) & mask)
    }
}

impl FromStr for Ipv4Net {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        let (addr_s, prefix_s) = s.split_once('/').ok_or_else(|| ConfigError {
            line: 0,
            message: format!("expected A.B.C.D/M subnet, got {s:?}"),
        })?;
        let addr: Ipv4Addr = addr_s.parse().map_err(|_| ConfigError {
            line: 0,
            message: format!("bad address {addr_s:?}"),
        })?;
        let prefix: u8 = prefix_s.parse().map_err(|_| ConfigError {
            line: 0,
            message: format!("bad prefix length {prefix_s:?}"),
        })?;
        if prefix > 32 {
            return Err(ConfigError {
                line: 0,
                message: format!("prefix length {prefix} out of range"),
            });
        }
        Ok(Ipv4Net::new(addr, prefix))
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// One `phyint` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyIntConfig {
    pub name: String,
    pub role: Role,
    pub ratelimit: u32,
    pub threshold: u8,
    pub altnet: Vec<Ipv4Net>,
    pub whitelist: Vec<Ipv4Net>,
}

impl PhyIntConfig {
    fn new(name: String, role: Role) -> Self {
        PhyIntConfig {
            name,
            role,
            ratelimit: DEFAULT_RATELIMIT,
            threshold: DEFAULT_THRESHOLD,
            altnet: Vec::new(),
            whitelist: Vec::new(),
        }
    }
}

/// The fully parsed configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub phyints: Vec<PhyIntConfig>,
    /// `quickleave`: on a v2 leave, prune the group immediately instead of
    /// running the last-member query burst. Off by default (RFC-compliant
    /// behavior).
    pub quickleave: bool,
}

fn tokenize(line: &str) -> Vec<&str> {
    line.split('#')
        .next()
        .unwrap_or("")
        .split_whitespace()
        .collect()
}

impl Config {
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = lineno + 1;
            let tokens = tokenize(raw_line);
            let Some(&directive) = tokens.first() else {
                continue;
            };
            match directive {
                "quickleave" => config.quickleave = true,
                "phyint" => config.phyints.push(parse_phyint(line, &tokens[1..])?),
                other => {
                    return Err(ConfigError {
                        line,
                        message: format!("unknown directive {other:?}"),
                    })
                }
            }
        }
        Ok(config)
    }
}

fn parse_phyint(line: usize, tokens: &[&str]) -> Result<PhyIntConfig, ConfigError> {
    let [name, role_tok, rest @ ..] = tokens else {
        return Err(ConfigError {
            line,
            message: "phyint requires <name> <upstream|downstream|disabled>".into(),
        });
    };
    let role = match *role_tok {
        "upstream" => Role::Upstream,
        "downstream" => Role::Downstream,
        "disabled" => Role::Disabled,
        other => {
            return Err(ConfigError {
                line,
                message: format!("unknown phyint role {other:?}"),
            })
        }
    };
    let mut phyint = PhyIntConfig::new((*name).to_string(), role);

    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "ratelimit" => {
                phyint.ratelimit = next_u32(line, rest, &mut i, "ratelimit")?;
            }
            "threshold" => {
                let v = next_u32(line, rest, &mut i, "threshold")?;
                phyint.threshold = u8::try_from(v).map_err(|_| ConfigError {
                    line,
                    message: format!("threshold {v} out of range"),
                })?;
            }
            "altnet" => {
                i += 1;
                let net = next_net(line, rest, i)?;
                phyint.altnet.push(net);
                i += 1;
            }
            "whitelist" => {
                i += 1;
                let net = next_net(line, rest, i)?;
                phyint.whitelist.push(net);
                i += 1;
            }
            other => {
                return Err(ConfigError {
                    line,
                    message: format!("unknown phyint qualifier {other:?}"),
                })
            }
        }
    }
    Ok(phyint)
}

fn next_u32(line: usize, rest: &[&str], i: &mut usize, what: &str) -> Result<u32, ConfigError> {
    *i += 1; // skip the keyword itself
    let tok = rest.get(*i).ok_or_else(|| ConfigError {
        line,
        message: format!("{what} requires a value"),
    })?;
    *i += 1; // skip the value
    tok.parse().map_err(|_| ConfigError {
        line,
        message: format!("bad {what} value {tok:?}"),
    })
}

fn next_net(line: usize, rest: &[&str], i: usize) -> Result<Ipv4Net, ConfigError> {
    let tok = rest.get(i).ok_or_else(|| ConfigError {
        line,
        message: "subnet qualifier requires a A.B.C.D/M value".into(),
    })?;
    tok.parse::<Ipv4Net>().map_err(|mut e| {
        e.line = line;
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let text = "phyint eth0 upstream\nphyint eth1 downstream ratelimit 1000 threshold 2\nquickleave\n";
        let config = Config::parse(text).unwrap();
        assert!(config.quickleave);
        assert_eq!(config.phyints.len(), 2);
        assert_eq!(config.phyints[0].role, Role::Upstream);
        assert_eq!(config.phyints[1].ratelimit, 1000);
        assert_eq!(config.phyints[1].threshold, 2);
    }

    #[test]
    fn parses_altnet_and_whitelist() {
        let text = "phyint eth1 downstream altnet 192.168.0.0/16 whitelist 239.0.0.0/8\n";
        let config = Config::parse(text).unwrap();
        let altnet = config.phyints[0].altnet[0];
        assert!(altnet.contains(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!altnet.contains(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "# a comment\n\nphyint eth0 upstream # trailing comment\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.phyints.len(), 1);
    }

    #[test]
    fn rejects_unknown_directive_with_line_number() {
        let err = Config::parse("bogus\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn rejects_bad_role() {
        let err = Config::parse("phyint eth0 sideways\n").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
