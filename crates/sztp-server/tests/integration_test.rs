//! Integration tests for sztp-server
//!
//! Drive both planes through their handlers against an in-memory server:
//! configure through the native RESTCONF interface, then bootstrap a device.

#[cfg(test)]
mod tests {
    use axum::http::{header, Method, Uri};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use sztp_core::restconf::first_error_tag;
    use sztp_core::Scope;
    use sztp_crypto::{
        decode_content_info, encode_certificate_bundle, pkcs8_to_ec_private_key, ContentType, PRIVATE_KEY_FORMAT_EC,
        PUBLIC_KEY_FORMAT_SPKI,
    };
    use sztp_plugins::{PluginError, BUILTIN_PLUGIN};
    use sztp_server::conveyed::{ONBOARDING_INFORMATION, REDIRECT_INFORMATION};
    use sztp_server::rfc8572::{GET_BOOTSTRAPPING_DATA, REPORT_PROGRESS};
    use sztp_server::{native, rfc8572, RestconfRequest, RestconfResponse, Server, Settings};

    const RUNNING: &str = "/restconf/ds/ietf-datastores:running";

    fn uri(path: &str) -> Uri {
        path.parse().unwrap()
    }

    async fn manage(server: &Server, method: Method, path: &str, doc: Option<Value>) -> RestconfResponse {
        let mut req = RestconfRequest::new(method, &uri(&format!("{}{}", RUNNING, path)));
        if let Some(doc) = doc {
            req = req.json_body(&doc);
        }
        native::handle(server, req).await
    }

    async fn create(server: &Server, doc: Value) {
        let response = manage(server, Method::POST, "", Some(doc)).await;
        assert_eq!(response.status, 201, "{:?}", response.body);
    }

    fn basic(serial: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", serial, password)))
    }

    async fn bootstrap(server: &Server, serial: &str, password: &str, input: Option<Value>) -> RestconfResponse {
        let path = format!("/restconf/operations/{}", GET_BOOTSTRAPPING_DATA);
        let mut req = RestconfRequest::new(Method::POST, &uri(&path)).header(header::AUTHORIZATION, &basic(serial, password));
        if let Some(input) = input {
            req = req.json_body(&json!({ "ietf-sztp-bootstrap-server:input": input }));
        }
        rfc8572::handle(server, req).await
    }

    fn conveyed_information(response: &RestconfResponse) -> Value {
        let output = response.json().unwrap();
        let b64 = output["ietf-sztp-bootstrap-server:output"]["conveyed-information"]
            .as_str()
            .unwrap();
        let (content_type, content) = decode_content_info(&STANDARD.decode(b64).unwrap()).unwrap();
        assert_eq!(content_type, ContentType::ConveyedInfoJson);
        serde_json::from_slice(&content).unwrap()
    }

    fn error_tag(response: &RestconfResponse) -> String {
        let doc = response.json().unwrap();
        first_error_tag(&doc).unwrap().to_string()
    }

    async fn onboarding_fixtures(server: &Server) {
        create(
            server,
            json!({"sztpd:boot-images": {"boot-image": [{
                "name": "os-17",
                "os-name": "ExampleOS",
                "os-version": "17.2",
                "download-uri": ["https://images.example.com/os-17.img"]
            }]}}),
        )
        .await;
        create(
            server,
            json!({"sztpd:configurations": {"configuration": [{
                "name": "base",
                "configuration-handling": "merge",
                "config": STANDARD.encode("<config/>")
            }]}}),
        )
        .await;
        create(
            server,
            json!({"sztpd:bootstrap-servers": {"bootstrap-server": [{
                "name": "bs1",
                "address": "bs1.example.com",
                "port": 8443
            }]}}),
        )
        .await;
        create(
            server,
            json!({"sztpd:conveyed-information-responses": {
                "onboarding-information-response": [{
                    "name": "onboard",
                    "onboarding-information": {"boot-image": "os-17", "configuration": "base"}
                }],
                "redirect-information-response": [{
                    "name": "redirect",
                    "redirect-information": {"bootstrap-server": ["bs1"]}
                }]
            }}),
        )
        .await;
    }

    fn device(serial: &str, responses: Value) -> Value {
        json!({"sztpd:devices": {"device": [{
            "serial-number": serial,
            "activation-code": "$0$secret",
            "response-manager": {"matched-response": responses}
        }]}})
    }

    #[tokio::test]
    async fn test_create_then_conflict() {
        let server = Server::in_memory(Settings::default());
        let doc = json!({"sztpd:boot-images": {"boot-image": [{"name": "os-17", "os-name": "ExampleOS"}]}});
        create(&server, doc.clone()).await;

        let response = manage(&server, Method::POST, "", Some(doc)).await;
        assert_eq!(response.status, 409);
        assert_eq!(error_tag(&response), "data-exists");

        let response = manage(&server, Method::GET, "/sztpd:boot-images/boot-image=os-17", None).await;
        assert_eq!(response.status, 200);
        let doc = response.json().unwrap();
        assert_eq!(doc["sztpd:boot-image"][0]["os-name"], "ExampleOS");
    }

    #[tokio::test]
    async fn test_onboarding_exchange() {
        let server = Server::in_memory(Settings::default());
        onboarding_fixtures(&server).await;
        create(
            &server,
            device(
                "SN-1",
                json!([{
                    "name": "onboard",
                    "response": {"conveyed-information": {"onboarding-information": {"reference": "onboard"}}}
                }]),
            ),
        )
        .await;

        let response = bootstrap(&server, "SN-1", "secret", None).await;
        assert_eq!(response.status, 200, "{:?}", response.body);
        let conveyed = conveyed_information(&response);
        let info = &conveyed[ONBOARDING_INFORMATION];
        assert_eq!(info["boot-image"]["os-name"], "ExampleOS");
        assert_eq!(info["configuration-handling"], "merge");
        assert_eq!(info["configuration"], STANDARD.encode("<config/>"));

        let device_path = Scope::Global.path("devices").child("device", Some("SN-1"));
        let stats = server
            .dal()
            .get_opstate(&device_path.join("lifecycle-statistics/sbi-access-stats"))
            .await
            .unwrap();
        assert_eq!(stats["num-times-accessed"], 1);

        let log = server
            .dal()
            .get_opstate(&device_path.join("bootstrapping-log/log-entry"))
            .await
            .unwrap();
        let entries = log.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["return-code"], 200);
        assert_eq!(
            entries[0]["event-details"]["get-bootstrapping-data-event"]["selected-response"],
            "onboard"
        );
    }

    #[tokio::test]
    async fn test_activation_code_mismatch_is_audited() {
        let server = Server::in_memory(Settings::default());
        create(&server, device("SN-2", json!([]))).await;

        // stored hashed, never in clear
        let stored = manage(&server, Method::GET, "/sztpd:devices/device=SN-2", None).await;
        let code = stored.json().unwrap()["sztpd:device"][0]["activation-code"].clone();
        assert_ne!(code, "$0$secret");
        assert_ne!(code, "secret");

        let response = bootstrap(&server, "SN-2", "wrong", None).await;
        assert_eq!(response.status, 401);
        assert_eq!(error_tag(&response), "access-denied");

        let audit = server
            .dal()
            .get_opstate(&Scope::Global.path("audit-log/log-entry"))
            .await
            .unwrap();
        let last = audit.as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["outcome"], "failure");
        assert_eq!(last["serial-number"], "SN-2");
        assert!(last["comment"].as_str().unwrap().contains("Activation code mismatch"));
    }

    #[tokio::test]
    async fn test_unknown_device_rejected() {
        let server = Server::in_memory(Settings::default());
        create(&server, device("SN-3", json!([]))).await;

        let response = bootstrap(&server, "SN-404", "secret", None).await;
        assert_eq!(response.status, 401);
        let audit = server
            .dal()
            .get_opstate(&Scope::Global.path("audit-log/log-entry"))
            .await
            .unwrap();
        let last = audit.as_array().unwrap().last().unwrap().clone();
        assert!(last["comment"].as_str().unwrap().contains("not found for any tenant"));
    }

    #[tokio::test]
    async fn test_first_matching_response_wins() {
        let server = Server::in_memory(Settings::default());
        onboarding_fixtures(&server).await;
        create(
            &server,
            device(
                "SN-4",
                json!([
                    {
                        "name": "lab-gear",
                        "match-criteria": {"match": [{"key": "hw-model", "value": "lab"}]},
                        "response": {"conveyed-information": {"onboarding-information": {"reference": "onboard"}}}
                    },
                    {
                        "name": "everyone-else",
                        "response": {"conveyed-information": {"redirect-information": {"reference": "redirect"}}}
                    },
                    {
                        "name": "unreachable",
                        "response": {"none": [null]}
                    }
                ]),
            ),
        )
        .await;

        let response = bootstrap(&server, "SN-4", "secret", Some(json!({"hw-model": "lab"}))).await;
        assert_eq!(response.status, 200);
        assert!(conveyed_information(&response).get(ONBOARDING_INFORMATION).is_some());

        let response = bootstrap(&server, "SN-4", "secret", Some(json!({"hw-model": "prod"}))).await;
        assert_eq!(response.status, 200);
        assert!(conveyed_information(&response).get(REDIRECT_INFORMATION).is_some());

        // criteria never match an exchange without input
        let response = bootstrap(&server, "SN-4", "secret", None).await;
        assert!(conveyed_information(&response).get(REDIRECT_INFORMATION).is_some());
    }

    #[tokio::test]
    async fn test_no_responses_configured() {
        let server = Server::in_memory(Settings::default());
        create(&server, device("SN-5", json!([]))).await;

        let response = bootstrap(&server, "SN-5", "secret", None).await;
        assert_eq!(response.status, 404);
        assert_eq!(error_tag(&response), "data-missing");
    }

    #[tokio::test]
    async fn test_mismatched_key_pair_fails_after_commit() {
        let server = Server::in_memory(Settings::default());
        let public = KeyPair::generate().unwrap().public_key_der();
        let other = KeyPair::generate().unwrap();
        let private = pkcs8_to_ec_private_key(&other.serialize_der()).unwrap();

        let doc = json!({"sztpd:keystore": {"asymmetric-keys": {"asymmetric-key": [{
            "name": "device-key",
            "public-key-format": PUBLIC_KEY_FORMAT_SPKI,
            "public-key": STANDARD.encode(public),
            "private-key-format": PRIVATE_KEY_FORMAT_EC,
            "cleartext-private-key": STANDARD.encode(private)
        }]}}});
        let response = manage(&server, Method::POST, "", Some(doc)).await;
        assert_eq!(response.status, 400);
        assert_eq!(error_tag(&response), "operation-failed");
        let message = response.json().unwrap()["ietf-restconf:errors"]["error"][0]["error-message"].clone();
        assert!(message.as_str().unwrap().contains("mismatched public/private key pair"));

        // the write itself is kept
        let response = manage(
            &server,
            Method::GET,
            "/sztpd:keystore/asymmetric-keys/asymmetric-key=device-key",
            None,
        )
        .await;
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_matching_key_pair_accepted() {
        let server = Server::in_memory(Settings::default());
        let pair = KeyPair::generate().unwrap();
        let private = pkcs8_to_ec_private_key(&pair.serialize_der()).unwrap();
        create(
            &server,
            json!({"sztpd:keystore": {"asymmetric-keys": {"asymmetric-key": [{
                "name": "device-key",
                "public-key-format": PUBLIC_KEY_FORMAT_SPKI,
                "public-key": STANDARD.encode(pair.public_key_der()),
                "private-key-format": PRIVATE_KEY_FORMAT_EC,
                "cleartext-private-key": STANDARD.encode(private)
            }]}}}),
        )
        .await;
    }

    fn plugin_doc(functions: &[&str]) -> Value {
        let functions: Vec<Value> = functions.iter().map(|f| json!({ "name": f })).collect();
        json!({"sztpd:preferences": {"system": {"plugins": {"plugin": [{
            "name": BUILTIN_PLUGIN,
            "functions": {"function": functions}
        }]}}}})
    }

    #[tokio::test]
    async fn test_plugin_hot_reload() {
        let server = Server::in_memory(Settings::default());
        create(&server, plugin_doc(&["echo_input"])).await;
        let input = json!({"serial-number": "SN-6"});
        assert!(server.plugins().invoke(BUILTIN_PLUGIN, "echo_input", &input).await.is_ok());
        assert!(matches!(
            server.plugins().invoke(BUILTIN_PLUGIN, "deny_all", &input).await,
            Err(PluginError::FunctionNotFound { .. })
        ));

        let plugin_path = format!("/sztpd:preferences/system/plugins/plugin={}", BUILTIN_PLUGIN);
        let response = manage(&server, Method::DELETE, &plugin_path, None).await;
        assert_eq!(response.status, 204);
        assert!(!server.plugins().is_loaded(BUILTIN_PLUGIN));
        assert!(matches!(
            server.plugins().invoke(BUILTIN_PLUGIN, "echo_input", &input).await,
            Err(PluginError::FunctionNotFound { .. })
        ));

        // a reloaded plugin only exposes what is configured now
        let response = manage(
            &server,
            Method::POST,
            "/sztpd:preferences/system/plugins",
            Some(json!({"sztpd:plugin": {
                "name": BUILTIN_PLUGIN,
                "functions": {"function": [{"name": "deny_all"}]}
            }})),
        )
        .await;
        assert_eq!(response.status, 201, "{:?}", response.body);
        assert!(server.plugins().invoke(BUILTIN_PLUGIN, "deny_all", &input).await.is_ok());
        assert!(matches!(
            server.plugins().invoke(BUILTIN_PLUGIN, "echo_input", &input).await,
            Err(PluginError::FunctionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_callout_errors_pass_through() {
        let server: Arc<Server> = Server::in_memory(Settings::default());
        create(&server, plugin_doc(&["deny_all"])).await;
        create(
            &server,
            json!({"sztpd:dynamic-callouts": {"dynamic-callout": [{
                "name": "gatekeeper",
                "rpc-supported": ["get-bootstrapping-data"],
                "callback": {"plugin": BUILTIN_PLUGIN, "function": "deny_all"}
            }]}}),
        )
        .await;
        create(
            &server,
            device(
                "SN-7",
                json!([{
                    "name": "ask-plugin",
                    "response": {"conveyed-information": {"dynamic-callout": {"reference": "gatekeeper"}}}
                }]),
            ),
        )
        .await;

        let response = bootstrap(&server, "SN-7", "secret", None).await;
        assert_eq!(response.status, 403);
        assert_eq!(error_tag(&response), "access-denied");
    }

    #[tokio::test]
    async fn test_admin_credentials_required_once_configured() {
        let server = Server::in_memory(Settings::default());
        create(
            &server,
            json!({"sztpd:admin-accounts": {"admin-account": [{"name": "admin", "password": "$0$hunter2"}]}}),
        )
        .await;

        let response = manage(&server, Method::GET, "/sztpd:admin-accounts", None).await;
        assert_eq!(response.status, 401);

        let req = RestconfRequest::new(Method::GET, &uri(&format!("{}/sztpd:admin-accounts", RUNNING)))
            .header(header::AUTHORIZATION, &basic("admin", "hunter2"));
        let response = native::handle(&server, req).await;
        assert_eq!(response.status, 200);
        let doc = response.json().unwrap();
        let password = doc["sztpd:admin-accounts"]["admin-account"][0]["password"].as_str().unwrap();
        assert!(!password.contains("hunter2"));
    }

    struct Issued {
        cert: Certificate,
        key: KeyPair,
    }

    impl Issued {
        fn der(&self) -> Vec<u8> {
            self.cert.der().to_vec()
        }
    }

    fn cert_params(cn: &str, ca: bool, serial: Option<&str>) -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        if let Some(serial) = serial {
            params
                .distinguished_name
                .push(DnType::CustomDnType(vec![2, 5, 4, 5]), serial);
        }
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        params
    }

    fn root_cert(cn: &str) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = cert_params(cn, true, None).self_signed(&key).unwrap();
        Issued { cert, key }
    }

    fn issue_cert(cn: &str, serial: Option<&str>, issuer: &Issued) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = cert_params(cn, false, serial)
            .signed_by(&key, &issuer.cert, &issuer.key)
            .unwrap();
        Issued { cert, key }
    }

    fn cert_data(certs: &[Vec<u8>]) -> String {
        STANDARD.encode(encode_certificate_bundle(certs).unwrap())
    }

    fn error_message(response: &RestconfResponse) -> String {
        let doc = response.json().unwrap();
        doc["ietf-restconf:errors"]["error"][0]["error-message"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn trust_bag(name: &str, certs: &[Vec<u8>]) -> Value {
        json!({"sztpd:truststore": {"certificate-bags": {"certificate-bag": [{
            "name": name,
            "certificate": [{"name": "anchor", "cert-data": cert_data(certs)}]
        }]}}})
    }

    async fn device_request(server: &Server, method: Method, path: &str, serial: &str, password: &str) -> RestconfResponse {
        let req = RestconfRequest::new(method, &uri(path)).header(header::AUTHORIZATION, &basic(serial, password));
        rfc8572::handle(server, req).await
    }

    async fn bootstrapping_log(server: &Server, serial: &str) -> Vec<Value> {
        let path = Scope::Global
            .path("devices")
            .child("device", Some(serial))
            .join("bootstrapping-log/log-entry");
        match server.dal().get_opstate(&path).await {
            Ok(Value::Array(entries)) => entries,
            _ => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_end_entity_cert_with_two_leaves_rejected() {
        let server = Server::in_memory(Settings::default());
        let ca = root_cert("ca");
        let first = issue_cert("first", None, &ca);
        let second = issue_cert("second", None, &ca);

        let doc = json!({"sztpd:keystore": {"asymmetric-keys": {"asymmetric-key": [{
            "name": "device-key",
            "certificates": {"certificate": [{
                "name": "idevid",
                "cert-data": cert_data(&[first.der(), second.der(), ca.der()])
            }]}
        }]}}});
        let response = manage(&server, Method::POST, "", Some(doc)).await;
        assert_eq!(response.status, 400);
        assert_eq!(error_tag(&response), "operation-failed");
        assert!(error_message(&response).contains("no more than one certificate having"));
    }

    #[tokio::test]
    async fn test_trust_anchor_needs_exactly_one_root() {
        let server = Server::in_memory(Settings::default());
        let first = root_cert("first");
        let second = root_cert("second");
        let response = manage(
            &server,
            Method::POST,
            "",
            Some(trust_bag("two-roots", &[first.der(), second.der()])),
        )
        .await;
        assert_eq!(response.status, 400);
        assert!(error_message(&response).contains("no more than one root (self-signed) certificate (2 found)"));

        let server = Server::in_memory(Settings::default());
        let leaf = issue_cert("orphan", None, &first);
        let response = manage(&server, Method::POST, "", Some(trust_bag("no-root", &[leaf.der()]))).await;
        assert_eq!(response.status, 400);
        assert!(error_message(&response).contains("must encode a root (self-signed) certificate"));

        let server = Server::in_memory(Settings::default());
        create(&server, trust_bag("good", &[first.der()])).await;
    }

    #[tokio::test]
    async fn test_public_key_written_after_certificate_is_cross_checked() {
        let server = Server::in_memory(Settings::default());
        let ca = root_cert("ca");
        let leaf = issue_cert("device", None, &ca);
        create(
            &server,
            json!({"sztpd:keystore": {"asymmetric-keys": {"asymmetric-key": [{
                "name": "device-key",
                "public-key-format": PUBLIC_KEY_FORMAT_SPKI,
                "certificates": {"certificate": [{"name": "idevid", "cert-data": cert_data(&[leaf.der(), ca.der()])}]}
            }]}}}),
        )
        .await;

        let other = KeyPair::generate().unwrap();
        let response = manage(
            &server,
            Method::PUT,
            "/sztpd:keystore/asymmetric-keys/asymmetric-key=device-key/public-key",
            Some(json!({"sztpd:public-key": STANDARD.encode(other.public_key_der())})),
        )
        .await;
        assert_eq!(response.status, 400, "{:?}", response.body);
        assert_eq!(error_tag(&response), "operation-failed");
        assert!(error_message(&response).contains("matching the asymmetric key's public key"));

        let response = manage(
            &server,
            Method::PUT,
            "/sztpd:keystore/asymmetric-keys/asymmetric-key=device-key/public-key",
            Some(json!({"sztpd:public-key": STANDARD.encode(leaf.key.public_key_der())})),
        )
        .await;
        assert_eq!(response.status, 204, "{:?}", response.body);
    }

    #[tokio::test]
    async fn test_certificate_written_after_public_key_is_cross_checked() {
        let server = Server::in_memory(Settings::default());
        let other = KeyPair::generate().unwrap();
        create(
            &server,
            json!({"sztpd:keystore": {"asymmetric-keys": {"asymmetric-key": [{
                "name": "device-key",
                "public-key-format": PUBLIC_KEY_FORMAT_SPKI,
                "public-key": STANDARD.encode(other.public_key_der())
            }]}}}),
        )
        .await;

        let ca = root_cert("ca");
        let leaf = issue_cert("device", None, &ca);
        let response = manage(
            &server,
            Method::POST,
            "/sztpd:keystore/asymmetric-keys/asymmetric-key=device-key",
            Some(json!({"sztpd:certificates": {"certificate": [{
                "name": "idevid",
                "cert-data": cert_data(&[leaf.der(), ca.der()])
            }]}})),
        )
        .await;
        assert_eq!(response.status, 400, "{:?}", response.body);
        assert!(error_message(&response).contains("matching the asymmetric key's public key"));
    }

    async fn client_cert_fixtures(server: &Server, anchor: &Issued) {
        create(server, trust_bag("vendor", &[anchor.der()])).await;
        create(
            server,
            json!({"sztpd:device-types": {"device-type": [{
                "name": "router",
                "identity-certificates": {"verification": {"local-truststore-reference": {
                    "certificate-bag": "vendor",
                    "certificate": "anchor"
                }}}
            }]}}),
        )
        .await;
        create(
            server,
            json!({"sztpd:devices": {"device": [{
                "serial-number": "SN-8",
                "device-type": "router",
                "response-manager": {"matched-response": [{"name": "silent", "response": {"none": [null]}}]}
            }]}}),
        )
        .await;
    }

    async fn with_client_cert(server: &Server, chain: Vec<Vec<u8>>) -> RestconfResponse {
        let req = RestconfRequest::new(Method::GET, &uri("/restconf")).peer_certs(chain);
        rfc8572::handle(server, req).await
    }

    #[tokio::test]
    async fn test_client_cert_validated_against_device_type() {
        let server = Server::in_memory(Settings::default());
        let vendor = root_cert("vendor");
        client_cert_fixtures(&server, &vendor).await;

        let idevid = issue_cert("router", Some("SN-8"), &vendor);
        let response = with_client_cert(&server, vec![idevid.der()]).await;
        assert_eq!(response.status, 200, "{:?}", response.body);

        let stranger = root_cert("stranger");
        let forged = issue_cert("router", Some("SN-8"), &stranger);
        let response = with_client_cert(&server, vec![forged.der()]).await;
        assert_eq!(response.status, 401);

        let audit = server
            .dal()
            .get_opstate(&Scope::Global.path("audit-log/log-entry"))
            .await
            .unwrap();
        let last = audit.as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["outcome"], "failure");
        assert!(last["comment"]
            .as_str()
            .unwrap()
            .contains("does not validate using trust anchors specified by device-type 'router'"));
    }

    #[tokio::test]
    async fn test_put_and_delete_status_codes() {
        let server = Server::in_memory(Settings::default());
        create(
            &server,
            json!({"sztpd:boot-images": {"boot-image": [{"name": "os-17", "os-name": "ExampleOS"}]}}),
        )
        .await;

        let target = "/sztpd:boot-images/boot-image=os-18";
        let doc = json!({"sztpd:boot-image": {"name": "os-18", "os-name": "ExampleOS"}});
        let response = manage(&server, Method::PUT, target, Some(doc.clone())).await;
        assert_eq!(response.status, 201, "{:?}", response.body);
        let response = manage(&server, Method::PUT, target, Some(doc)).await;
        assert_eq!(response.status, 204, "{:?}", response.body);

        let response = manage(&server, Method::DELETE, target, None).await;
        assert_eq!(response.status, 204);
        let response = manage(&server, Method::DELETE, target, None).await;
        assert_eq!(response.status, 404);
        assert_eq!(error_tag(&response), "unknown-element");
    }

    #[tokio::test]
    async fn test_report_progress_is_logged() {
        let server = Server::in_memory(Settings::default());
        create(&server, device("SN-9", json!([]))).await;

        let path = format!("/restconf/operations/{}", REPORT_PROGRESS);
        let req = RestconfRequest::new(Method::POST, &uri(&path))
            .header(header::AUTHORIZATION, &basic("SN-9", "secret"))
            .json_body(&json!({"ietf-sztp-bootstrap-server:input": {"progress-type": "bootstrap-initiated"}}));
        let response = rfc8572::handle(&server, req).await;
        assert_eq!(response.status, 204, "{:?}", response.body);

        let req = RestconfRequest::new(Method::POST, &uri(&path)).header(header::AUTHORIZATION, &basic("SN-9", "secret"));
        let response = rfc8572::handle(&server, req).await;
        assert_eq!(response.status, 400);

        let log = bootstrapping_log(&server, "SN-9").await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0]["return-code"], 204);
        assert_eq!(
            log[0]["event-details"]["report-progress-event"]["passed-input"]["progress-type"],
            "bootstrap-initiated"
        );
        assert_eq!(log[1]["return-code"], 400);
    }

    #[tokio::test]
    async fn test_every_exchange_authenticates_first() {
        let server = Server::in_memory(Settings::default());
        create(&server, device("SN-10", json!([]))).await;

        for path in ["/restconf", "/restconf/ds/ietf-datastores:running"] {
            let response = device_request(&server, Method::GET, path, "SN-10", "wrong").await;
            assert_eq!(response.status, 401, "{}", path);
        }
        assert!(bootstrapping_log(&server, "SN-10").await.is_empty());

        let audit = server
            .dal()
            .get_opstate(&Scope::Global.path("audit-log/log-entry"))
            .await
            .unwrap();
        let failures = audit
            .as_array()
            .unwrap()
            .iter()
            .filter(|entry| entry["outcome"] == "failure" && entry["serial-number"] == "SN-10")
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_bootstrap_datastores_are_empty_and_logged() {
        let server = Server::in_memory(Settings::default());
        create(&server, device("SN-11", json!([]))).await;

        let expected = [
            (Method::GET, "/restconf", 200),
            (Method::GET, "/restconf/ds/ietf-datastores:running", 204),
            (Method::GET, "/restconf/ds/ietf-datastores:running/sztpd:devices", 404),
            (Method::PUT, "/restconf/ds/ietf-datastores:running", 400),
            (Method::GET, "/restconf/ds/ietf-datastores:operational", 200),
            (Method::GET, "/restconf/data/ietf-sztp-bootstrap-server:anything", 404),
        ];
        for (count, (method, path, status)) in expected.into_iter().enumerate() {
            let response = device_request(&server, method, path, "SN-11", "secret").await;
            assert_eq!(response.status, status, "{}", path);
            let log = bootstrapping_log(&server, "SN-11").await;
            assert_eq!(log.len(), count + 1, "{}", path);
            assert_eq!(log[count]["return-code"], status);
        }

        let response = device_request(
            &server,
            Method::GET,
            "/restconf/ds/ietf-datastores:operational",
            "SN-11",
            "secret",
        )
        .await;
        let doc = response.json().unwrap();
        assert!(doc.get("ietf-yang-library:yang-library").is_some());
    }

    #[tokio::test]
    async fn test_explicit_none_response() {
        let server = Server::in_memory(Settings::default());
        create(
            &server,
            device("SN-12", json!([{"name": "silent", "response": {"none": [null]}}])),
        )
        .await;

        let response = bootstrap(&server, "SN-12", "secret", None).await;
        assert_eq!(response.status, 404);
        assert_eq!(error_tag(&response), "data-missing");
        assert_eq!(error_message(&response), "No matching responses configured.");

        let log = bootstrapping_log(&server, "SN-12").await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["return-code"], 404);
    }

    #[tokio::test]
    async fn test_authentication_failure_on_bad_anchors_is_audited() {
        let server = Server::in_memory(Settings::default());
        // rejected by its callback, but the write is kept
        let response = manage(
            &server,
            Method::POST,
            "",
            Some(json!({"sztpd:truststore": {"certificate-bags": {"certificate-bag": [{
                "name": "vendor",
                "certificate": [{"name": "anchor", "cert-data": STANDARD.encode(b"not a bundle")}]
            }]}}})),
        )
        .await;
        assert_eq!(response.status, 400);
        create(
            &server,
            json!({"sztpd:device-types": {"device-type": [{
                "name": "router",
                "identity-certificates": {"verification": {"local-truststore-reference": {
                    "certificate-bag": "vendor"
                }}}
            }]}}),
        )
        .await;
        create(
            &server,
            json!({"sztpd:devices": {"device": [{
                "serial-number": "SN-13",
                "device-type": "router",
                "activation-code": "$0$secret"
            }]}}),
        )
        .await;

        let response = device_request(&server, Method::GET, "/restconf", "SN-13", "secret").await;
        assert_eq!(response.status, 500);
        assert!(bootstrapping_log(&server, "SN-13").await.is_empty());

        let audit = server
            .dal()
            .get_opstate(&Scope::Global.path("audit-log/log-entry"))
            .await
            .unwrap();
        let last = audit.as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["outcome"], "failure");
        assert!(last["comment"]
            .as_str()
            .unwrap()
            .starts_with("Unable to authenticate device"));
    }
}
