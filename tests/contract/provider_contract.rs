use std::sync::Arc;

use carbonroute_core::{
    CapabilitySet, CarbonSource, ElectricityMapsForecastAdapter, ElectricityMapsLatestAdapter,
    Endpoint, FailureClass, FetchRequest, FootprintWindowAdapter, Location, MockAdapter,
    ProviderId, RawPayload, ScriptedHttpClient, SourceErrorKind, UtcDateTime,
};

/// One HTTP-backed adapter, its declared capabilities and a canonical upstream body.
struct ProviderCase {
    id: ProviderId,
    capabilities: CapabilitySet,
    canonical_body: &'static str,
    build: fn(Arc<ScriptedHttpClient>) -> Arc<dyn CarbonSource>,
}

fn provider_cases() -> Vec<ProviderCase> {
    vec![
        ProviderCase {
            id: ProviderId::ElectricityMapsLatest,
            capabilities: CapabilitySet::new(true, false, false),
            canonical_body: r#"{"zone": "NL", "carbonIntensity": 245, "datetime": "2025-03-01T10:00:00.000Z"}"#,
            build: |client| {
                Arc::new(ElectricityMapsLatestAdapter::new(client, Some(String::from("token"))))
            },
        },
        ProviderCase {
            id: ProviderId::ElectricityMapsForecast,
            capabilities: CapabilitySet::new(false, true, true),
            canonical_body: r#"{"zone": "NL", "forecast": [
                {"datetime": "2025-03-01T10:00:00.000Z", "carbonIntensity": 245},
                {"datetime": "2025-03-01T11:00:00.000Z", "carbonIntensity": 230}
            ]}"#,
            build: |client| {
                Arc::new(ElectricityMapsForecastAdapter::new(client, Some(String::from("token"))))
            },
        },
        ProviderCase {
            id: ProviderId::FootprintWindow,
            capabilities: CapabilitySet::new(true, true, false),
            canonical_body: r#"{"value": 245, "start": "2025-03-01T10:00:00Z", "zone": "NL", "valid": true}"#,
            build: |client| {
                Arc::new(FootprintWindowAdapter::new(client, "https://footprint.test/window"))
            },
        },
    ]
}

fn location() -> Location {
    Location::new(52.0, 5.0).expect("valid location")
}

fn target() -> UtcDateTime {
    UtcDateTime::parse("2025-03-01T10:25:00Z").expect("valid time")
}

fn request_for(endpoint: Endpoint) -> FetchRequest {
    match endpoint {
        Endpoint::Latest => FetchRequest::latest(location(), target()),
        Endpoint::AtTime => FetchRequest::at_time(location(), target()),
        Endpoint::Series => FetchRequest::series(location(), target()),
    }
}

const ENDPOINTS: [Endpoint; 3] = [Endpoint::Latest, Endpoint::AtTime, Endpoint::Series];

fn first_supported(capabilities: CapabilitySet) -> Endpoint {
    ENDPOINTS
        .into_iter()
        .find(|endpoint| capabilities.supports(*endpoint))
        .expect("every adapter serves something")
}

#[test]
fn every_adapter_declares_its_identity_and_capabilities() {
    for case in provider_cases() {
        let source = (case.build)(Arc::new(ScriptedHttpClient::new()));
        assert_eq!(source.id(), case.id);
        assert_eq!(source.capabilities(), case.capabilities, "provider '{}'", case.id);
    }

    let mock = MockAdapter::new();
    assert_eq!(mock.id(), ProviderId::Mock);
    assert_eq!(mock.capabilities(), CapabilitySet::full());
}

#[tokio::test]
async fn unsupported_endpoints_are_rejected_without_an_upstream_call() {
    for case in provider_cases() {
        for endpoint in ENDPOINTS {
            if case.capabilities.supports(endpoint) {
                continue;
            }
            let client = Arc::new(ScriptedHttpClient::new());
            let source = (case.build)(client.clone());

            let error = source
                .fetch(&request_for(endpoint))
                .await
                .expect_err("unsupported endpoint");
            assert_eq!(
                error.kind(),
                SourceErrorKind::UnsupportedEndpoint,
                "provider '{}' endpoint '{endpoint}'",
                case.id
            );
            assert_eq!(client.call_count(), 0, "provider '{}'", case.id);
        }
    }
}

#[tokio::test]
async fn canonical_payloads_normalize_to_a_reading_from_the_provider() {
    for case in provider_cases() {
        for endpoint in [Endpoint::Latest, Endpoint::AtTime] {
            if !case.capabilities.supports(endpoint) {
                continue;
            }
            let client = Arc::new(ScriptedHttpClient::new());
            client.push_json(200, case.canonical_body);
            let source = (case.build)(client.clone());
            let request = request_for(endpoint);

            let payload = source.fetch(&request).await.unwrap_or_else(|error| {
                panic!("provider '{}' fetch failed: {error}", case.id)
            });
            let reading = source.normalize(&payload, &request).unwrap_or_else(|error| {
                panic!("provider '{}' normalize failed: {error}", case.id)
            });

            assert_eq!(reading.source(), case.id);
            assert_eq!(reading.ci_value(), 245.0, "provider '{}'", case.id);
            assert_eq!(reading.zone(), Some("NL"), "provider '{}'", case.id);
            assert_eq!(
                reading.timestamp().format_rfc3339(),
                "2025-03-01T10:00:00Z",
                "provider '{}'",
                case.id
            );
            assert!(reading.valid(), "provider '{}'", case.id);
        }
    }
}

#[tokio::test]
async fn upstream_statuses_map_to_the_same_failure_classes() {
    let expectations = [
        (401, FailureClass::Auth),
        (403, FailureClass::Auth),
        (429, FailureClass::Transient),
        (503, FailureClass::Transient),
        (404, FailureClass::Unrecoverable),
    ];

    for case in provider_cases() {
        let endpoint = first_supported(case.capabilities);
        for (status, class) in expectations {
            let client = Arc::new(ScriptedHttpClient::new());
            client.push_json(status, "{}");
            let source = (case.build)(client.clone());

            let error = source
                .fetch(&request_for(endpoint))
                .await
                .expect_err("non-success status");
            assert_eq!(
                source.classify(&error),
                class,
                "provider '{}' status {status}",
                case.id
            );
            assert_eq!(error.status(), Some(status), "provider '{}'", case.id);
        }
    }
}

#[tokio::test]
async fn non_json_bodies_are_malformed() {
    for case in provider_cases() {
        let client = Arc::new(ScriptedHttpClient::new());
        client.push_json(200, "<html>maintenance</html>");
        let source = (case.build)(client);

        let error = source
            .fetch(&request_for(first_supported(case.capabilities)))
            .await
            .expect_err("not json");
        assert_eq!(error.kind(), SourceErrorKind::Malformed, "provider '{}'", case.id);
        assert_eq!(source.classify(&error), FailureClass::Unrecoverable);
    }
}

#[test]
fn empty_payloads_are_data_absent() {
    for case in provider_cases() {
        let source = (case.build)(Arc::new(ScriptedHttpClient::new()));
        let endpoint = [Endpoint::Latest, Endpoint::AtTime]
            .into_iter()
            .find(|endpoint| case.capabilities.supports(*endpoint))
            .expect("reading endpoint");

        let error = source
            .normalize(&RawPayload::new(serde_json::json!([])), &request_for(endpoint))
            .expect_err("empty array");
        assert_eq!(error.kind(), SourceErrorKind::DataAbsent, "provider '{}'", case.id);
        assert_eq!(source.classify(&error), FailureClass::DataAbsent);
    }
}
