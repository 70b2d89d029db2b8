//! Rewrites a production EOS running-config into a cEOS-lab startup-config.
//!
//! Everything here is a pure function of its inputs. Lines that no rule
//! recognises are passed through untouched.

use regex_lite::Regex;
use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

/// Marker prepended to lines the lab cannot use
pub const REMOVED_MARKER: &str = "!removed_for_cEOS-lab| ";

/// Comment out every line starting with `prefix`
#[derive(Debug, Clone, Deserialize)]
pub struct PrefixRule {
    pub prefix: String,
    /// Only apply when the device version matches this regex
    #[serde(default)]
    pub versions: Option<String>,
}

/// Replace every occurrence of `from` with `to`
#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceRule {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub versions: Option<String>,
}

/// Rule set, loadable from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct SanitizerRules {
    #[serde(default)]
    pub comment_prefixes: Vec<PrefixRule>,
    #[serde(default)]
    pub replacements: Vec<ReplaceRule>,
    /// Comment out `interface EthernetN/2..4` sections entirely
    #[serde(default = "default_true")]
    pub drop_breakout_lanes: bool,
    /// Rename `interface EthernetN/1` to `interface EthernetN`
    #[serde(default = "default_true")]
    pub collapse_first_lane: bool,
}

fn default_true() -> bool { true }

impl Default for SanitizerRules {
    fn default() -> Self {
        let prefixes = [
            "radius",
            "username",
            "aaa",
            "ip radius",
            "hardware speed",
            "queue",
            "server ",
            "ntp server",
            "daemon TerminAttr",
            "   exec /usr/bin/TerminAttr",
        ];
        Self {
            comment_prefixes: prefixes
                .iter()
                .map(|p| PrefixRule {
                    prefix: p.to_string(),
                    versions: None,
                })
                .collect(),
            replacements: vec![ReplaceRule {
                from: "Management1".to_string(),
                to: "Management0".to_string(),
                versions: None,
            }],
            drop_breakout_lanes: true,
            collapse_first_lane: true,
        }
    }
}

struct CompiledPrefix {
    prefix: String,
    versions: Option<Regex>,
}

struct CompiledReplace {
    from: String,
    to: String,
    versions: Option<Regex>,
}

/// Config transformer built from a validated rule set
pub struct Sanitizer {
    prefixes: Vec<CompiledPrefix>,
    replacements: Vec<CompiledReplace>,
    drop_breakout_lanes: bool,
    collapse_first_lane: bool,
}

fn compile_versions(pattern: &Option<String>, source: &str) -> Result<Option<Regex>, ConfigError> {
    match pattern {
        Some(p) => Regex::new(p).map(Some).map_err(|e| ConfigError::RulesUnreadable {
            path: source.to_string(),
            reason: format!("invalid versions pattern {:?}: {}", p, e),
        }),
        None => Ok(None),
    }
}

fn applies(versions: &Option<Regex>, version: &str) -> bool {
    versions.as_ref().map_or(true, |re| re.is_match(version))
}

impl Sanitizer {
    pub fn new(rules: SanitizerRules) -> Result<Self, ConfigError> {
        Self::compile(rules, "<built-in>")
    }

    /// Load a JSON rule file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RulesUnreadable {
            path: source.clone(),
            reason: e.to_string(),
        })?;
        let rules: SanitizerRules = serde_json::from_str(&content).map_err(|e| ConfigError::RulesUnreadable {
            path: source.clone(),
            reason: e.to_string(),
        })?;
        Self::compile(rules, &source)
    }

    fn compile(rules: SanitizerRules, source: &str) -> Result<Self, ConfigError> {
        let prefixes = rules
            .comment_prefixes
            .iter()
            .map(|r| {
                Ok(CompiledPrefix {
                    prefix: r.prefix.clone(),
                    versions: compile_versions(&r.versions, source)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let replacements = rules
            .replacements
            .iter()
            .map(|r| {
                Ok(CompiledReplace {
                    from: r.from.clone(),
                    to: r.to.clone(),
                    versions: compile_versions(&r.versions, source)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            prefixes,
            replacements,
            drop_breakout_lanes: rules.drop_breakout_lanes,
            collapse_first_lane: rules.collapse_first_lane,
        })
    }

    /// Rewrite `raw` for a device running `version`. Never fails.
    pub fn transform(&self, raw: &[String], version: &str) -> Vec<String> {
        let prefixes: Vec<&str> = self
            .prefixes
            .iter()
            .filter(|r| applies(&r.versions, version))
            .map(|r| r.prefix.as_str())
            .collect();
        let replacements: Vec<&CompiledReplace> = self
            .replacements
            .iter()
            .filter(|r| applies(&r.versions, version))
            .collect();

        let mut out = Vec::with_capacity(raw.len());
        let mut in_breakout_section = false;

        for original in raw {
            let mut line = original.clone();
            for r in &replacements {
                if line.contains(r.from.as_str()) {
                    line = line.replace(r.from.as_str(), &r.to);
                }
            }

            // Everything up to and including the section's closing '!'.
            // An unterminated section still ends at `end`, which is kept.
            if in_breakout_section {
                if line.trim() == "end" {
                    in_breakout_section = false;
                } else {
                    if line == "!" {
                        in_breakout_section = false;
                    }
                    out.push(format!("!{}", line));
                    continue;
                }
            }

            if self.drop_breakout_lanes && is_breakout_interface(&line) {
                in_breakout_section = true;
                out.push(format!("!{}", line));
                continue;
            }

            if prefixes.iter().any(|p| line.starts_with(p)) {
                out.push(format!("{}{}", REMOVED_MARKER, line));
                continue;
            }

            if self.collapse_first_lane {
                if let Some(collapsed) = collapse_first_lane(&line) {
                    out.push(collapsed);
                    continue;
                }
            }

            out.push(line);
        }

        out
    }
}

/// Lane number of an `interface EthernetN/M` line, if it has one
fn ethernet_lane(line: &str) -> Option<u32> {
    let name = line.strip_prefix("interface Ethernet")?;
    let (_, lane) = name.rsplit_once('/')?;
    lane.trim().parse().ok()
}

fn is_breakout_interface(line: &str) -> bool {
    matches!(ethernet_lane(line), Some(2..=4))
}

fn collapse_first_lane(line: &str) -> Option<String> {
    if ethernet_lane(line) != Some(1) {
        return None;
    }
    line.split_once('/').map(|(base, _)| base.to_string())
}

/// Number of front-panel Ethernet interfaces the lab node needs.
/// Breakout lanes 2-4 fold into their parent port.
pub fn count_ethernet_interfaces(config: &[String]) -> usize {
    config
        .iter()
        .filter(|line| line.starts_with("interface Ethernet") && !is_breakout_interface(line))
        .count()
}

/// Append an on-boot event handler that restores the production switch's
/// system MAC, inserted before the final `end`.
pub fn apply_system_mac(config: &[String], system_mac: &str) -> Vec<String> {
    let mut out = config.to_vec();
    if system_mac.trim().is_empty() {
        return out;
    }

    let snippet = [
        "event-handler onStartup".to_string(),
        "   trigger on-boot".to_string(),
        "   action bash".to_string(),
        format!("      var_sysmac='{}'", system_mac.trim()),
        "      echo $var_sysmac > /mnt/flash/system_mac_address".to_string(),
        "      truncate -s -1 /mnt/flash/system_mac_address".to_string(),
        "      EOF".to_string(),
        "!".to_string(),
    ];

    let insert_at = out
        .iter()
        .rposition(|l| l.trim() == "end")
        .unwrap_or(out.len());
    out.splice(insert_at..insert_at, snippet);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        s.lines().map(|l| l.to_string()).collect()
    }

    const RAW: &str = "! device: leaf1 (DCS-7050SX3-48YC8, EOS-4.28.3M)
hostname leaf1
username admin privilege 15 role network-admin secret sha512 $6$abc
aaa authorization exec default local
ntp server 10.0.0.1
daemon TerminAttr
   exec /usr/bin/TerminAttr -ingestgrpcurl=10.0.0.5:9910
   no shutdown
!
interface Ethernet1
   description to-spine1
!
interface Ethernet49/1
   speed forced 100gfull
!
interface Ethernet49/2
   shutdown
!
interface Management1
   ip address 192.0.2.10/24
!
logging host 10.0.0.9
end";

    #[test]
    fn test_transform_default_rules() {
        let sanitizer = Sanitizer::new(SanitizerRules::default()).unwrap();
        let out = sanitizer.transform(&lines(RAW), "4.28.3M");

        assert_eq!(out.len(), lines(RAW).len());
        assert!(out.contains(&format!("{}username admin privilege 15 role network-admin secret sha512 $6$abc", REMOVED_MARKER)));
        assert!(out.contains(&format!("{}aaa authorization exec default local", REMOVED_MARKER)));
        assert!(out.contains(&format!("{}ntp server 10.0.0.1", REMOVED_MARKER)));
        assert!(out.contains(&format!("{}daemon TerminAttr", REMOVED_MARKER)));
        assert!(out.contains(&format!("{}   exec /usr/bin/TerminAttr -ingestgrpcurl=10.0.0.5:9910", REMOVED_MARKER)));
        assert!(out.contains(&"interface Ethernet49".to_string()));
        assert!(out.contains(&"!interface Ethernet49/2".to_string()));
        assert!(out.contains(&"!   shutdown".to_string()));
        assert!(out.contains(&"interface Management0".to_string()));
        // unknown lines pass through
        assert!(out.contains(&"logging host 10.0.0.9".to_string()));
        assert!(out.contains(&"   description to-spine1".to_string()));
        assert_eq!(out.last().map(String::as_str), Some("end"));
    }

    #[test]
    fn test_breakout_section_ends_at_bang() {
        let sanitizer = Sanitizer::new(SanitizerRules::default()).unwrap();
        let out = sanitizer.transform(&lines("interface Ethernet1/3\n   shutdown\n!\ninterface Ethernet2\n!"), "4.28.3M");
        assert_eq!(out, ["!interface Ethernet1/3", "!   shutdown", "!!", "interface Ethernet2", "!"]);
    }

    #[test]
    fn test_unterminated_breakout_section_keeps_end() {
        let sanitizer = Sanitizer::new(SanitizerRules::default()).unwrap();
        let out = sanitizer.transform(&lines("hostname leaf1\ninterface Ethernet49/2\n   shutdown\nend"), "4.28.3M");
        assert_eq!(out, ["hostname leaf1", "!interface Ethernet49/2", "!   shutdown", "end"]);

        let out = apply_system_mac(&out, "28:99:3a:be:9f:91");
        assert_eq!(out.last().map(String::as_str), Some("end"));
        assert_eq!(out[3], "event-handler onStartup");
    }

    #[test]
    fn test_transform_is_deterministic() {
        let sanitizer = Sanitizer::new(SanitizerRules::default()).unwrap();
        let raw = lines(RAW);
        let first = sanitizer.transform(&raw, "4.28.3M");
        for _ in 0..5 {
            assert_eq!(sanitizer.transform(&raw, "4.28.3M"), first);
        }
    }

    #[test]
    fn test_version_scoped_rules() {
        let rules: SanitizerRules = serde_json::from_str(
            r#"{
                "comment_prefixes": [{"prefix": "hardware tcam", "versions": "^4\\.2[0-5]"}],
                "drop_breakout_lanes": false
            }"#,
        )
        .unwrap();
        assert!(rules.collapse_first_lane);
        let sanitizer = Sanitizer::new(rules).unwrap();
        let raw = lines("hardware tcam\ninterface Ethernet1/2");

        let old = sanitizer.transform(&raw, "4.23.1F");
        assert_eq!(old[0], format!("{}hardware tcam", REMOVED_MARKER));
        assert_eq!(old[1], "interface Ethernet1/2");

        let new = sanitizer.transform(&raw, "4.30.1F");
        assert_eq!(new[0], "hardware tcam");
    }

    #[test]
    fn test_invalid_versions_pattern_rejected() {
        let rules = SanitizerRules {
            comment_prefixes: vec![PrefixRule {
                prefix: "x".to_string(),
                versions: Some("(".to_string()),
            }],
            ..SanitizerRules::default()
        };
        assert!(matches!(Sanitizer::new(rules), Err(ConfigError::RulesUnreadable { .. })));
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"comment_prefixes": [{{"prefix": "snmp-server"}}]}}"#).unwrap();
        let sanitizer = Sanitizer::from_file(file.path()).unwrap();
        let out = sanitizer.transform(&lines("snmp-server community public ro"), "4.28.3M");
        assert_eq!(out[0], format!("{}snmp-server community public ro", REMOVED_MARKER));
    }

    #[test]
    fn test_count_ethernet_interfaces() {
        assert_eq!(count_ethernet_interfaces(&lines(RAW)), 2);
        assert_eq!(count_ethernet_interfaces(&lines("interface Ethernet1/1\ninterface Ethernet1/2\ninterface Ethernet1/3\ninterface Ethernet1/4\ninterface Ethernet2")), 2);
    }

    #[test]
    fn test_apply_system_mac_before_end() {
        let out = apply_system_mac(&lines("hostname leaf1\n!\nend"), "28:99:3a:be:9f:91");
        assert_eq!(out.first().map(String::as_str), Some("hostname leaf1"));
        assert_eq!(out.last().map(String::as_str), Some("end"));
        assert!(out.contains(&"event-handler onStartup".to_string()));
        assert!(out.contains(&"      var_sysmac='28:99:3a:be:9f:91'".to_string()));
    }

    #[test]
    fn test_apply_system_mac_empty_mac_is_noop() {
        let raw = lines("hostname leaf1\nend");
        assert_eq!(apply_system_mac(&raw, ""), raw);
    }
}
