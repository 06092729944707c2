//! Integration tests for the full patch session
//!
//! Exercises the documented scenarios end to end: fresh patch, idempotent
//! re-run, fallback candidates, append-only merges, and compat gating.

use serde_yaml::Value;
use subpatch::compat::CompatMode;
use subpatch::config::Profile;
use subpatch::doc::{path, Document, TargetPath};
use subpatch::report::{self, ChangeKind};
use subpatch::session;

const SUBSCRIPTION: &str = "\
mixed-port: 7890
dns:
  enable: true
  fake-ip-filter:
    - '*.lan'
proxies:
  - name: US-NewYork-01
    type: ss
    server: a.example.net
    port: 8443
    cipher: aes-128-gcm
    password: secret
  - name: JP-Tokyo-01
    type: ss
    server: b.example.net
    port: 8443
    cipher: aes-128-gcm
    password: secret
  - name: US-LA-02
    type: ss
    server: c.example.net
    port: 8443
    cipher: aes-128-gcm
    password: secret
proxy-groups:
  - name: Proxy
    type: select
    proxies:
      - US-NewYork-01
      - JP-Tokyo-01
      - US-LA-02
rules:
  - 'DOMAIN-SUFFIX,local,DIRECT'
  - 'MATCH,Proxy'
";

fn mihomo_profile() -> Profile {
    let mut profile = Profile::default();
    profile.compat = CompatMode::Mihomo;
    profile
}

fn sequence_of_names(document: &Document, target: &TargetPath) -> Vec<String> {
    path::resolve(document.root(), target.steps())
        .unwrap_or_else(|| panic!("missing {target}"))
        .as_sequence()
        .expect("expected a sequence")
        .iter()
        .map(|item| item.as_str().expect("expected a string").to_string())
        .collect()
}

#[test]
fn fresh_patch_builds_the_full_chain() {
    let report = session::run(&mihomo_profile(), SUBSCRIPTION).unwrap();
    assert!(report.changed);

    let patched = Document::parse(&report.patched).unwrap();

    // Top-level port ensured next to the subscription's own keys.
    assert_eq!(
        patched.root().get(&Value::from("port")),
        Some(&Value::from(7891u64))
    );

    // Dialer candidates resolved from the node snapshot in source order.
    let dialer = TargetPath::key("proxy-groups")
        .then_entry("name", "US Auto")
        .then_key("proxies");
    assert_eq!(
        sequence_of_names(&patched, &dialer),
        vec!["US-NewYork-01", "US-LA-02"]
    );

    // The engine-owned node dials through the url-test group.
    let node = path::resolve(
        patched.root(),
        TargetPath::key("proxies")
            .then_entry("name", "Residential SOCKS5")
            .steps(),
    )
    .expect("residential node present")
    .as_mapping()
    .unwrap()
    .clone();
    assert_eq!(
        node.get(&Value::from("dialer-proxy")),
        Some(&Value::from("US Auto"))
    );
    assert_eq!(node.get(&Value::from("type")), Some(&Value::from("socks5")));

    // The entry group is exposed in the operator's selector, appended at
    // the end with the original entries untouched.
    let selector = TargetPath::key("proxy-groups")
        .then_entry("name", "Proxy")
        .then_key("proxies");
    assert_eq!(
        sequence_of_names(&patched, &selector),
        vec!["US-NewYork-01", "JP-Tokyo-01", "US-LA-02", "Residential Exit"]
    );

    // Bypass safety net appended to rules, original rules kept in place.
    let rules = sequence_of_names(&patched, &TargetPath::key("rules"));
    assert_eq!(rules[0], "DOMAIN-SUFFIX,local,DIRECT");
    assert_eq!(rules[1], "MATCH,Proxy");
    assert!(rules.contains(&"IP-CIDR,10.0.0.0/8,DIRECT,no-resolve".to_string()));

    // tun exists with route exclusions.
    let tun = patched
        .root()
        .get(&Value::from("tun"))
        .and_then(Value::as_mapping)
        .expect("tun section present");
    assert_eq!(tun.get(&Value::from("enable")), Some(&Value::Bool(true)));
}

#[test]
fn second_run_is_a_no_op() {
    let profile = mihomo_profile();
    let first = session::run(&profile, SUBSCRIPTION).unwrap();
    let second = session::run(&profile, &first.patched).unwrap();

    assert!(!second.changed, "unexpected changes: {:?}", second.changes);
    assert!(second.changes.is_empty());
    assert_eq!(second.before, second.patched);
}

#[test]
fn untouched_structure_round_trips() {
    let report = session::run(&mihomo_profile(), SUBSCRIPTION).unwrap();
    let patched = Document::parse(&report.patched).unwrap();

    // The operator's node fields the engine does not own survive verbatim.
    let tokyo = path::resolve(
        patched.root(),
        TargetPath::key("proxies")
            .then_entry("name", "JP-Tokyo-01")
            .steps(),
    )
    .unwrap()
    .as_mapping()
    .unwrap()
    .clone();
    assert_eq!(
        tokyo.get(&Value::from("cipher")),
        Some(&Value::from("aes-128-gcm"))
    );
    assert_eq!(
        patched.root().get(&Value::from("mixed-port")),
        Some(&Value::from(7890u64))
    );
}

#[test]
fn empty_proxies_fall_back_to_the_configured_list() {
    let mut profile = mihomo_profile();
    profile.resi.node_patterns = vec!["US-*".to_string()];
    profile.resi.node_fallback = vec!["US-Fallback".to_string()];

    let report = session::run(
        &profile,
        "proxies: []\nproxy-groups:\n  - name: Proxy\n    type: select\n    proxies: [DIRECT]\nrules: []\n",
    )
    .unwrap();

    let patched = Document::parse(&report.patched).unwrap();
    let dialer = TargetPath::key("proxy-groups")
        .then_entry("name", "US Auto")
        .then_key("proxies");
    assert_eq!(sequence_of_names(&patched, &dialer), vec!["US-Fallback"]);
}

#[test]
fn empty_proxies_without_fallback_fail_the_run() {
    let mut profile = mihomo_profile();
    profile.resi.node_fallback.clear();

    let err = session::run(
        &profile,
        "proxies: []\nproxy-groups: []\nrules: []\n",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        subpatch::PatchError::EmptyCandidates { .. }
    ));
}

#[test]
fn customized_selector_gains_exactly_one_entry() {
    let document = "\
proxies:
  - name: US-NewYork-01
    type: ss
    server: a.example.net
    port: 8443
proxy-groups:
  - name: Proxy
    type: select
    proxies:
      - one
      - two
      - three
      - four
      - five
rules: []
";
    let mut profile = mihomo_profile();
    profile.features.bypass = false;

    let report = session::run(&profile, document).unwrap();
    let patched = Document::parse(&report.patched).unwrap();
    let selector = TargetPath::key("proxy-groups")
        .then_entry("name", "Proxy")
        .then_key("proxies");
    assert_eq!(
        sequence_of_names(&patched, &selector),
        vec!["one", "two", "three", "four", "five", "Residential Exit"]
    );
}

#[test]
fn classic_compat_skips_mihomo_only_rules_silently() {
    let mut profile = mihomo_profile();
    profile.compat = CompatMode::Classic;

    let report = session::run(&profile, SUBSCRIPTION).unwrap();

    // No mihomo-only targets were written...
    let patched = Document::parse(&report.patched).unwrap();
    assert!(patched.root().get(&Value::from("tun")).is_none());
    assert!(patched.proxy_names().iter().all(|n| n != "Residential SOCKS5"));
    assert!(!report
        .changes
        .iter()
        .any(|change| change.path.starts_with("tun")));

    // ...while classic-safe rules still ran.
    assert_eq!(
        patched.root().get(&Value::from("port")),
        Some(&Value::from(7891u64))
    );
    assert!(report.changes.iter().any(|change| change.path == "rules"));
}

#[test]
fn partially_patched_document_is_corrected_not_duplicated() {
    let profile = mihomo_profile();
    let first = session::run(&profile, SUBSCRIPTION).unwrap();

    // Simulate an upstream refresh clobbering the port and the group type.
    let mut mangled = Document::parse(&first.patched).unwrap();
    mangled
        .root_mut()
        .insert(Value::from("port"), Value::from(9999u64));
    let report = session::run(&profile, &mangled.to_yaml().unwrap()).unwrap();

    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].kind, ChangeKind::Corrected);
    assert_eq!(report.changes[0].path, "port");
    assert_eq!(report.changes[0].previous.as_deref(), Some("9999"));

    // Still exactly one residential node and one dialer group.
    let patched = Document::parse(&report.patched).unwrap();
    let nodes = patched.proxy_names();
    assert_eq!(
        nodes.iter().filter(|n| *n == "Residential SOCKS5").count(),
        1
    );
}

#[test]
fn changelog_and_diff_render_the_run() {
    let report = session::run(&mihomo_profile(), SUBSCRIPTION).unwrap();

    let changelog = report::render_changelog(&report.changes, &report.warnings);
    assert!(changelog.contains("added"));
    assert!(changelog.contains("appended"));
    assert!(changelog.contains("port"));

    let diff = report::unified_diff(&report.before, &report.patched, "before", "after");
    assert!(diff.contains("+port: 7891"));

    // Deterministic rendering: same input, same output.
    let again = session::run(&mihomo_profile(), SUBSCRIPTION).unwrap();
    assert_eq!(
        changelog,
        report::render_changelog(&again.changes, &again.warnings)
    );
    assert_eq!(report.patched, again.patched);
}
