//! Proptest strategies for vcsmirror types.

use proptest::prelude::*;

/// Strategy for DNS-style host names.
pub fn hostname_strategy() -> impl Strategy<Value = String> {
    (
        "[a-z][a-z0-9]{1,10}",
        prop::option::of("[a-z][a-z0-9]{1,8}"),
        prop_oneof![Just("com"), Just("org"), Just("io"), Just("net")],
    )
        .prop_map(|(name, sub, tld)| match sub {
            Some(sub) => format!("{sub}.{name}.{tld}"),
            None => format!("{name}.{tld}"),
        })
}

/// Strategy for `group/project.git` repository paths, without leading slash.
pub fn repo_path_strategy() -> impl Strategy<Value = String> {
    ("[a-z][a-z0-9_-]{0,12}", "[a-z][a-z0-9_.-]{0,16}")
        .prop_map(|(group, project)| format!("{group}/{project}.git"))
}

/// Strategy for SCP-style locations such as `git@host:group/project.git`.
pub fn scp_location_strategy() -> impl Strategy<Value = String> {
    (hostname_strategy(), repo_path_strategy()).prop_map(|(host, path)| format!("git@{host}:{path}"))
}

/// Strategy for URL locations over the supported schemes.
pub fn url_location_strategy() -> impl Strategy<Value = String> {
    let scheme = prop_oneof![
        Just("ssh"),
        Just("git"),
        Just("http"),
        Just("https"),
        Just("svn+https"),
        Just("hg+https"),
    ];
    (
        scheme,
        prop::option::of("[a-z][a-z0-9]{0,8}"),
        hostname_strategy(),
        prop::option::of(1u16..65535),
        repo_path_strategy(),
    )
        .prop_map(|(scheme, user, host, port, path)| {
            let user = user.map(|u| format!("{u}@")).unwrap_or_default();
            let port = port.map(|p| format!(":{p}")).unwrap_or_default();
            format!("{scheme}://{user}{host}{port}/{path}")
        })
}

fn numeric_field(min: u32, max: u32) -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*".to_string()),
        (min..=max).prop_map(|n| n.to_string()),
        (1u32..=(max - min).max(1)).prop_map(|step| format!("*/{step}")),
        (min..=max, min..=max).prop_map(|(a, b)| {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            format!("{lo}-{hi}")
        }),
        prop::collection::btree_set(min..=max, 1..4).prop_map(|set| {
            set.into_iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(",")
        }),
    ]
}

/// Strategy for five-field cron expressions that must parse.
pub fn cron_expression_strategy() -> impl Strategy<Value = String> {
    (
        numeric_field(0, 59),
        numeric_field(0, 23),
        numeric_field(1, 31),
        numeric_field(1, 12),
        numeric_field(0, 6),
    )
        .prop_map(|(minute, hour, dom, month, dow)| format!("{minute} {hour} {dom} {month} {dow}"))
}
