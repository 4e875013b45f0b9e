//! The SZTPD data model
//!
//! Global nodes live at the datastore root; in multi-tenant mode most of them
//! are repeated per tenant under `/sztpd:tenants/tenant`. Leafrefs are
//! resolved relative to the scope (root or tenant) holding the referrer.

use crate::schema::{anydata, container, leaf, leaf_list, list, LeafType, Schema, SchemaNode};
use sztp_core::Mode;

const PUBLIC_KEY_FORMATS: &[&str] = &["ietf-crypto-types:subject-public-key-info-format"];
const PRIVATE_KEY_FORMATS: &[&str] = &["ietf-crypto-types:ec-private-key-format"];
const CONFIG_HANDLING: &[&str] = &["merge", "replace"];
const RPCS: &[&str] = &["get-bootstrapping-data", "report-progress"];
const ENCODINGS: &[&str] = &["json", "xml"];

/// Build the schema for the given deployment mode.
pub fn sztpd_schema(mode: Mode) -> Schema {
    let mut top = vec![
        container(
            "admin-accounts",
            vec![list(
                "admin-account",
                "name",
                vec![
                    leaf("name", LeafType::String),
                    leaf("email", LeafType::String),
                    leaf("password", LeafType::String),
                    leaf("password-last-modified", LeafType::String),
                ],
            )],
        ),
        container(
            "transport",
            vec![container(
                "listen",
                vec![list(
                    "endpoint",
                    "name",
                    vec![
                        leaf("name", LeafType::String),
                        leaf("address", LeafType::String),
                        leaf("port", LeafType::Uint),
                    ],
                )],
            )],
        ),
        preferences(true),
    ];
    top.extend(scoped_nodes());

    if mode == Mode::MultiTenant {
        let mut tenant_children = vec![leaf("name", LeafType::String), preferences(false)];
        tenant_children.extend(scoped_nodes());
        top.push(container("tenants", vec![list("tenant", "name", tenant_children)]));
    }
    Schema::new(top)
}

fn reference_statistics() -> SchemaNode {
    container(
        "reference-statistics",
        vec![
            leaf("reference-count", LeafType::Uint),
            leaf("last-referenced", LeafType::String),
        ],
    )
    .state()
}

/// A named, referenceable list entry
fn referenceable(name: &'static str, mut children: Vec<SchemaNode>) -> SchemaNode {
    children.insert(0, leaf("name", LeafType::String));
    children.push(reference_statistics());
    list(name, "name", children)
}

fn log(name: &'static str) -> SchemaNode {
    container(name, vec![anydata("log-entry")]).state()
}

fn reference(target: &'static str) -> SchemaNode {
    leaf("reference", LeafType::Leafref(target))
}

fn preferences(global: bool) -> SchemaNode {
    let mut children = vec![container(
        "notification-delivery",
        vec![container(
            "dynamic-callout",
            vec![reference("dynamic-callouts/dynamic-callout")],
        )],
    )];
    if global {
        children.push(container(
            "system",
            vec![container(
                "plugins",
                vec![list(
                    "plugin",
                    "name",
                    vec![
                        leaf("name", LeafType::String),
                        container(
                            "functions",
                            vec![list("function", "name", vec![leaf("name", LeafType::String)])],
                        ),
                    ],
                )],
            )],
        ));
    }
    container("preferences", children)
}

fn tcp_client() -> SchemaNode {
    container(
        "tcp-client-parameters",
        vec![
            leaf("remote-address", LeafType::String),
            leaf("remote-port", LeafType::Uint),
        ],
    )
}

fn response_manager() -> SchemaNode {
    container(
        "response-manager",
        vec![list(
            "matched-response",
            "name",
            vec![
                leaf("name", LeafType::String),
                container(
                    "match-criteria",
                    vec![list(
                        "match",
                        "key",
                        vec![
                            leaf("key", LeafType::String),
                            leaf("present", LeafType::Empty),
                            leaf("not", LeafType::Empty),
                            leaf("value", LeafType::String),
                        ],
                    )],
                ),
                container(
                    "response",
                    vec![
                        leaf("none", LeafType::Empty),
                        container(
                            "conveyed-information",
                            vec![
                                container(
                                    "dynamic-callout",
                                    vec![reference("dynamic-callouts/dynamic-callout")],
                                ),
                                container(
                                    "redirect-information",
                                    vec![reference(
                                        "conveyed-information-responses/redirect-information-response",
                                    )],
                                ),
                                container(
                                    "onboarding-information",
                                    vec![reference(
                                        "conveyed-information-responses/onboarding-information-response",
                                    )],
                                ),
                            ],
                        ),
                    ],
                ),
            ],
        )
        .ordered()],
    )
}

fn scoped_nodes() -> Vec<SchemaNode> {
    vec![
        log("audit-log"),
        log("bootstrapping-log"),
        container(
            "keystore",
            vec![container(
                "asymmetric-keys",
                vec![referenceable(
                    "asymmetric-key",
                    vec![
                        leaf("public-key-format", LeafType::Enumeration(PUBLIC_KEY_FORMATS)),
                        leaf("public-key", LeafType::Binary),
                        leaf("private-key-format", LeafType::Enumeration(PRIVATE_KEY_FORMATS)),
                        leaf("cleartext-private-key", LeafType::Binary),
                        container(
                            "certificates",
                            vec![list(
                                "certificate",
                                "name",
                                vec![leaf("name", LeafType::String), leaf("cert-data", LeafType::Binary)],
                            )],
                        ),
                    ],
                )],
            )],
        ),
        container(
            "truststore",
            vec![container(
                "certificate-bags",
                vec![referenceable(
                    "certificate-bag",
                    vec![
                        leaf("description", LeafType::String),
                        list(
                            "certificate",
                            "name",
                            vec![leaf("name", LeafType::String), leaf("cert-data", LeafType::Binary)],
                        ),
                    ],
                )],
            )],
        ),
        container(
            "device-types",
            vec![referenceable(
                "device-type",
                vec![
                    leaf("description", LeafType::String),
                    container(
                        "identity-certificates",
                        vec![container(
                            "verification",
                            vec![container(
                                "local-truststore-reference",
                                vec![
                                    leaf(
                                        "certificate-bag",
                                        LeafType::Leafref("truststore/certificate-bags/certificate-bag"),
                                    ),
                                    leaf("certificate", LeafType::String),
                                ],
                            )],
                        )],
                    ),
                ],
            )],
        ),
        container(
            "devices",
            vec![list(
                "device",
                "serial-number",
                vec![
                    leaf("serial-number", LeafType::String),
                    leaf("device-type", LeafType::Leafref("device-types/device-type")),
                    leaf("activation-code", LeafType::String),
                    response_manager(),
                    container(
                        "lifecycle-statistics",
                        vec![anydata("nbi-access-stats"), anydata("sbi-access-stats")],
                    )
                    .state(),
                    log("bootstrapping-log"),
                ],
            )],
        ),
        response_manager(),
        container(
            "bootstrap-servers",
            vec![referenceable(
                "bootstrap-server",
                vec![
                    leaf("address", LeafType::String),
                    leaf("port", LeafType::Uint),
                    leaf("trust-anchor", LeafType::Binary),
                ],
            )],
        ),
        container(
            "boot-images",
            vec![referenceable(
                "boot-image",
                vec![
                    leaf("os-name", LeafType::String),
                    leaf("os-version", LeafType::String),
                    leaf_list("download-uri", LeafType::String),
                    list(
                        "image-verification",
                        "hash-algorithm",
                        vec![
                            leaf("hash-algorithm", LeafType::String),
                            leaf("hash-value", LeafType::String),
                        ],
                    ),
                ],
            )],
        ),
        container(
            "scripts",
            vec![
                referenceable("pre-configuration-script", vec![leaf("script", LeafType::Binary)]),
                referenceable("post-configuration-script", vec![leaf("script", LeafType::Binary)]),
            ],
        ),
        container(
            "configurations",
            vec![referenceable(
                "configuration",
                vec![
                    leaf("configuration-handling", LeafType::Enumeration(CONFIG_HANDLING)),
                    leaf("config", LeafType::Binary),
                ],
            )],
        ),
        container(
            "conveyed-information-responses",
            vec![
                referenceable(
                    "redirect-information-response",
                    vec![container(
                        "redirect-information",
                        vec![leaf_list(
                            "bootstrap-server",
                            LeafType::Leafref("bootstrap-servers/bootstrap-server"),
                        )],
                    )],
                ),
                referenceable(
                    "onboarding-information-response",
                    vec![container(
                        "onboarding-information",
                        vec![
                            leaf("boot-image", LeafType::Leafref("boot-images/boot-image")),
                            leaf(
                                "pre-configuration-script",
                                LeafType::Leafref("scripts/pre-configuration-script"),
                            ),
                            leaf("configuration", LeafType::Leafref("configurations/configuration")),
                            leaf(
                                "post-configuration-script",
                                LeafType::Leafref("scripts/post-configuration-script"),
                            ),
                        ],
                    )],
                ),
            ],
        ),
        container(
            "dynamic-callouts",
            vec![referenceable(
                "dynamic-callout",
                vec![
                    leaf_list("rpc-supported", LeafType::Enumeration(RPCS)),
                    container(
                        "callback",
                        vec![leaf("plugin", LeafType::String), leaf("function", LeafType::String)],
                    ),
                    container(
                        "webhooks",
                        vec![
                            leaf("encoding", LeafType::Enumeration(ENCODINGS)),
                            list(
                                "webhook",
                                "name",
                                vec![
                                    leaf("name", LeafType::String),
                                    container("http", vec![tcp_client()]),
                                    container("https", vec![tcp_client()]),
                                ],
                            )
                            .ordered(),
                        ],
                    ),
                ],
            )],
        ),
    ]
}
