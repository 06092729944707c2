//! Builds the fixed, ordered rule set for one run.
//!
//! Rule order encodes the dependencies the engine does not infer: the
//! dialer group is ensured before the node whose `dialer-proxy` names it,
//! and membership rules follow the mapping rules that create their targets.

use crate::config::{BypassConfig, Profile, ResiConfig};
use crate::doc::{Document, TargetPath};
use crate::errors::PatchError;
use crate::matcher::PatternSet;
use crate::rules::op::{EnsureOp, Feature, Guard, MergeStrategy, Rule};
use serde_yaml::{Mapping, Value};

const RESI: Guard = Guard {
    feature: Feature::Resi,
    mihomo_only: false,
};
const RESI_MIHOMO: Guard = Guard {
    feature: Feature::Resi,
    mihomo_only: true,
};
const BYPASS: Guard = Guard {
    feature: Feature::Bypass,
    mihomo_only: false,
};
const BYPASS_MIHOMO: Guard = Guard {
    feature: Feature::Bypass,
    mihomo_only: true,
};

/// Well-known selector-group names, tried in order when the profile does
/// not pin one (or pins one the document does not have).
const SELECTOR_FALLBACKS: [&str; 6] = ["🚀 节点选择", "节点选择", "Proxy", "PROXY", "代理", "默认"];

/// A built rule set plus the warnings produced while building it.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub warnings: Vec<String>,
}

/// Instantiate the rule set for `profile` against a snapshot of `document`.
pub fn build(profile: &Profile, document: &Document) -> Result<RuleSet, PatchError> {
    let mut set = RuleSet {
        rules: Vec::new(),
        warnings: Vec::new(),
    };
    if profile.features.resi {
        build_resi(&profile.resi, document, &mut set)?;
    }
    if profile.features.bypass {
        build_bypass(&profile.bypass, &mut set);
    }
    Ok(set)
}

fn build_resi(
    resi: &ResiConfig,
    document: &Document,
    set: &mut RuleSet,
) -> Result<(), PatchError> {
    let patterns = PatternSet::compile(&resi.node_patterns)?;
    let mut snapshot = document.proxy_names();
    // The engine-owned node must not dial through itself.
    snapshot.retain(|name| name != &resi.proxy_name);
    let candidates = patterns.resolve(&snapshot, &resi.node_fallback);
    let candidate_values: Vec<Value> = candidates
        .iter()
        .map(|name| Value::from(name.as_str()))
        .collect();

    set.rules.push(Rule::new(
        "resi: top-level port",
        RESI,
        EnsureOp::Scalar {
            path: TargetPath::key("port"),
            value: Value::from(u64::from(resi.listen_port)),
        },
    ));

    let mut dialer = Mapping::new();
    dialer.insert(Value::from("name"), Value::from(resi.dialer_group.as_str()));
    dialer.insert(Value::from("type"), Value::from("url-test"));
    dialer.insert(Value::from("url"), Value::from(resi.healthcheck.url.as_str()));
    dialer.insert(
        Value::from("interval"),
        Value::from(u64::from(resi.healthcheck.interval)),
    );
    dialer.insert(
        Value::from("tolerance"),
        Value::from(u64::from(resi.healthcheck.tolerance)),
    );
    dialer.insert(
        Value::from("proxies"),
        Value::Sequence(candidate_values.clone()),
    );
    set.rules.push(Rule::new(
        format!("resi: dialer group '{}'", resi.dialer_group),
        RESI_MIHOMO,
        EnsureOp::Mapping {
            path: TargetPath::key("proxy-groups").then_entry("name", &resi.dialer_group),
            template: dialer,
            enforce: fields(&["type", "url", "interval", "tolerance"]),
        },
    ));

    set.rules.push(Rule::new(
        format!("resi: dialer candidates for '{}'", resi.dialer_group),
        RESI_MIHOMO,
        EnsureOp::Membership {
            path: TargetPath::key("proxy-groups")
                .then_entry("name", &resi.dialer_group)
                .then_key("proxies"),
            entries: candidate_values,
            strategy: MergeStrategy::Replace,
        },
    ));

    let mut node = Mapping::new();
    node.insert(Value::from("name"), Value::from(resi.proxy_name.as_str()));
    node.insert(Value::from("type"), Value::from("socks5"));
    node.insert(Value::from("server"), Value::from(resi.server.as_str()));
    node.insert(Value::from("port"), Value::from(u64::from(resi.port)));
    node.insert(Value::from("username"), Value::from(resi.username.as_str()));
    node.insert(Value::from("password"), Value::from(resi.password.as_str()));
    node.insert(
        Value::from("dialer-proxy"),
        Value::from(resi.dialer_group.as_str()),
    );
    set.rules.push(Rule::new(
        format!("resi: node '{}'", resi.proxy_name),
        RESI_MIHOMO,
        EnsureOp::Mapping {
            path: TargetPath::key("proxies").then_entry("name", &resi.proxy_name),
            template: node,
            enforce: fields(&[
                "type",
                "server",
                "port",
                "username",
                "password",
                "dialer-proxy",
            ]),
        },
    ));

    let mut entry = Mapping::new();
    entry.insert(Value::from("name"), Value::from(resi.entry_group.as_str()));
    entry.insert(Value::from("type"), Value::from("select"));
    entry.insert(
        Value::from("proxies"),
        Value::Sequence(vec![
            Value::from(resi.proxy_name.as_str()),
            Value::from("DIRECT"),
        ]),
    );
    set.rules.push(Rule::new(
        format!("resi: entry group '{}'", resi.entry_group),
        RESI_MIHOMO,
        EnsureOp::Mapping {
            path: TargetPath::key("proxy-groups").then_entry("name", &resi.entry_group),
            template: entry,
            enforce: fields(&["type"]),
        },
    ));

    set.rules.push(Rule::new(
        format!("resi: entry group '{}' candidates", resi.entry_group),
        RESI_MIHOMO,
        EnsureOp::Membership {
            path: TargetPath::key("proxy-groups")
                .then_entry("name", &resi.entry_group)
                .then_key("proxies"),
            entries: vec![
                Value::from(resi.proxy_name.as_str()),
                Value::from("DIRECT"),
            ],
            strategy: MergeStrategy::AppendOnly,
        },
    ));

    match selector_group(document, resi) {
        Some(selector) => set.rules.push(Rule::new(
            format!("resi: expose entry group in '{selector}'"),
            RESI_MIHOMO,
            EnsureOp::Membership {
                path: TargetPath::key("proxy-groups")
                    .then_entry("name", &selector)
                    .then_key("proxies"),
                entries: vec![Value::from(resi.entry_group.as_str())],
                strategy: MergeStrategy::AppendOnly,
            },
        )),
        None => set.warnings.push(
            "resi: no selector group found in the document; entry group not exposed".to_string(),
        ),
    }

    Ok(())
}

/// Pick the operator-facing selector group to expose the entry group in.
/// The configured name wins only when the document actually has it.
fn selector_group(document: &Document, resi: &ResiConfig) -> Option<String> {
    let groups = document.group_names();
    if let Some(wanted) = &resi.selector_group {
        if groups.iter().any(|name| name == wanted) {
            return Some(wanted.clone());
        }
    }
    SELECTOR_FALLBACKS
        .iter()
        .find(|candidate| groups.iter().any(|name| name == *candidate))
        .map(|name| name.to_string())
}

fn build_bypass(bypass: &BypassConfig, set: &mut RuleSet) {
    let cidr_values: Vec<Value> = bypass
        .cidrs
        .iter()
        .map(|cidr| Value::from(cidr.as_str()))
        .collect();

    let mut tun = Mapping::new();
    tun.insert(Value::from("enable"), Value::Bool(true));
    tun.insert(Value::from("stack"), Value::from("system"));
    tun.insert(Value::from("auto-route"), Value::Bool(true));
    tun.insert(Value::from("auto-detect-interface"), Value::Bool(true));
    tun.insert(
        Value::from("dns-hijack"),
        Value::Sequence(vec![Value::from("any:53")]),
    );
    tun.insert(
        Value::from("route-exclude-address"),
        Value::Sequence(cidr_values.clone()),
    );
    set.rules.push(Rule::new(
        "bypass: tun section",
        BYPASS_MIHOMO,
        EnsureOp::Mapping {
            path: TargetPath::key("tun"),
            template: tun,
            enforce: Vec::new(),
        },
    ));

    set.rules.push(Rule::new(
        "bypass: tun route exclusions",
        BYPASS_MIHOMO,
        EnsureOp::Membership {
            path: TargetPath::key("tun").then_key("route-exclude-address"),
            entries: cidr_values,
            strategy: MergeStrategy::AppendOnly,
        },
    ));

    if !bypass.domains.is_empty() {
        let fake_ip: Vec<Value> = bypass
            .domains
            .iter()
            .map(|domain| Value::from(format!("+.{domain}")))
            .collect();
        set.rules.push(Rule::new(
            "bypass: dns fake-ip filter",
            BYPASS,
            EnsureOp::Membership {
                path: TargetPath::key("dns").then_key("fake-ip-filter"),
                entries: fake_ip,
                strategy: MergeStrategy::AppendOnly,
            },
        ));

        if !bypass.internal_dns.is_empty() {
            let servers: Vec<Value> = bypass
                .internal_dns
                .iter()
                .map(|server| Value::from(server.as_str()))
                .collect();
            let mut policy = Mapping::new();
            let mut enforce = Vec::new();
            for domain in &bypass.domains {
                let pattern = format!("+.{domain}");
                policy.insert(
                    Value::from(pattern.as_str()),
                    Value::Sequence(servers.clone()),
                );
                enforce.push(pattern);
            }
            set.rules.push(Rule::new(
                "bypass: dns nameserver policy",
                BYPASS_MIHOMO,
                EnsureOp::Mapping {
                    path: TargetPath::key("dns").then_key("nameserver-policy"),
                    template: policy,
                    enforce,
                },
            ));
        }
    }

    let mut direct: Vec<Value> = bypass
        .cidrs
        .iter()
        .map(|cidr| Value::from(format!("IP-CIDR,{cidr},DIRECT,no-resolve")))
        .collect();
    direct.extend(
        bypass
            .domains
            .iter()
            .map(|domain| Value::from(format!("DOMAIN-SUFFIX,{domain},DIRECT"))),
    );
    set.rules.push(Rule::new(
        "bypass: DIRECT safety-net rules",
        BYPASS,
        EnsureOp::Membership {
            path: TargetPath::key("rules"),
            entries: direct,
            strategy: MergeStrategy::AppendOnly,
        },
    ));
}

fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
