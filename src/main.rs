#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use marstek_cloud_rs::api::{self, Client};
use marstek_cloud_rs::coordinator::{Coordinator, CoordinatorState, DEFAULT_SCAN_INTERVAL_SECS};
use marstek_cloud_rs::intake::{self, IntakeError, Options, SetupInput};
use marstek_cloud_rs::model::DEFAULT_CAPACITY_KWH;
use rocket::fairing::AdHoc;
use rocket::http::ContentType;
use rocket::{Build, Rocket, State};
use std::collections::BTreeMap;
use std::sync::Arc;

mod metrics;

#[derive(Clone, serde::Deserialize)]
pub struct MarstekConfig {
    api_url: String,
    email: String,
    password: String,
    scan_interval: i64,
    default_capacity: f64,
    /// Capacity in kWh keyed by devid.
    #[serde(default)]
    capacities: BTreeMap<String, f64>,
}

/// Structure containing state for API handlers.
pub struct StateData {
    coordinator: Arc<Coordinator>,
    options: Options,
}

pub fn read_settings() -> Result<MarstekConfig, config::ConfigError> {
    let mut settings = Config::default();
    settings
        .set_default("api_url", api::API_URL)?
        .set_default("scan_interval", DEFAULT_SCAN_INTERVAL_SECS as i64)?
        .set_default("default_capacity", DEFAULT_CAPACITY_KWH)?;
    settings
        .merge(config::File::with_name("marstek").required(false))?
        .merge(config::Environment::with_prefix("MARSTEK"))?;

    settings.try_into()
}

/// Validate settings and credentials, then build the coordinator and run its first refresh.
async fn setup(settings: MarstekConfig) -> Result<StateData, IntakeError> {
    let input = SetupInput {
        email: settings.email,
        password: settings.password,
        scan_interval: settings.scan_interval,
        default_capacity: settings.default_capacity,
    };
    let (credentials, scan_interval, default_capacity) = input.validate()?;
    for capacity in settings.capacities.values() {
        intake::validate_capacity(*capacity)?;
    }

    let devices = intake::validate_credentials(&settings.api_url, &credentials).await?;
    let options = Options::for_devices(
        &devices,
        &settings.capacities,
        scan_interval,
        default_capacity,
    );
    log::info!(
        "Found {} device(s), refreshing every {}s",
        options.capacities.len(),
        scan_interval
    );

    let client = Client::new(settings.api_url, credentials)?;
    let coordinator = Coordinator::new(
        client,
        scan_interval,
        settings.capacities,
        default_capacity,
    )?;
    coordinator.first_refresh().await?;

    Ok(StateData {
        coordinator: Arc::new(coordinator),
        options,
    })
}

#[get("/metrics")]
async fn metrics_route(state: &State<StateData>) -> String {
    metrics::update(&state.coordinator.state());
    metrics::read()
}

#[get("/dump-devices")]
async fn dump_devices_route(state: &State<StateData>) -> Result<(ContentType, String), api::Error> {
    let CoordinatorState {
        snapshot,
        last_error,
        ..
    } = state.coordinator.state();
    let snapshot = match snapshot {
        Some(snapshot) => snapshot,
        None => {
            return Err(last_error
                .unwrap_or_else(|| api::Error::ApiError("No data fetched yet".to_string())))
        }
    };

    serde_json::to_string_pretty(&snapshot.devices)
        .map(|json| (ContentType::JSON, json))
        .map_err(|e| api::Error::ApiError(e.to_string()))
}

#[get("/options")]
async fn options_route(state: &State<StateData>) -> Result<(ContentType, String), api::Error> {
    serde_json::to_string_pretty(&state.options)
        .map(|json| (ContentType::JSON, json))
        .map_err(|e| api::Error::ApiError(e.to_string()))
}

#[launch]
async fn rocket() -> Rocket<Build> {
    env_logger::init();

    let settings = match read_settings() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let state = match setup(settings).await {
        Ok(state) => state,
        Err(e) => {
            log::error!("Setup failed ({}): {}", e.key(), e);
            std::process::exit(1);
        }
    };

    tokio::spawn(state.coordinator.clone().run());
    build(state)
}

fn build(state: StateData) -> Rocket<Build> {
    let coordinator = state.coordinator.clone();

    rocket::build()
        .manage(state)
        .attach(AdHoc::on_shutdown("Stop refresh loop", |_| {
            Box::pin(async move { coordinator.shutdown() })
        }))
        .mount("/", routes![metrics_route, dump_devices_route, options_route])
}

#[cfg(test)]
mod test {
    use super::*;
    use marstek_cloud_rs::model::Credentials;
    use rocket::http::Status;
    use marstek_cloud_rs::api::endpoint;
    use rocket::local::blocking::Client as LocalClient;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn idle_state() -> StateData {
        let client = Client::new(
            "http://127.0.0.1:9".to_string(),
            Credentials::new("user@example.com".into(), "password".into()),
        )
        .unwrap();
        let coordinator =
            Coordinator::new(client, 30, BTreeMap::new(), DEFAULT_CAPACITY_KWH).unwrap();

        StateData {
            coordinator: Arc::new(coordinator),
            options: Options {
                scan_interval: 30,
                capacities: BTreeMap::from([("dev-1".to_string(), 10.0)]),
            },
        }
    }

    #[test]
    fn dump_devices_without_snapshot_is_unavailable() {
        let client = LocalClient::tracked(build(idle_state())).unwrap();

        let response = client.get("/dump-devices").dispatch();

        assert_eq!(Status::ServiceUnavailable, response.status());
    }

    #[test]
    fn options_are_served_as_json() {
        let client = LocalClient::tracked(build(idle_state())).unwrap();

        let response = client.get("/options").dispatch();

        assert_eq!(Status::Ok, response.status());
        assert_eq!(Some(ContentType::JSON), response.content_type());
        let body = response.into_string().unwrap();
        assert!(body.contains("\"dev-1\": 10.0"));
    }

    #[test]
    fn metrics_report_offline_before_first_update() {
        let client = LocalClient::tracked(build(idle_state())).unwrap();

        let body = client.get("/metrics").dispatch().into_string().unwrap();

        assert!(body.contains("marstek_connection_status 0"));
    }

    fn settings(api_url: String) -> MarstekConfig {
        MarstekConfig {
            api_url,
            email: "user@example.com".to_string(),
            password: "password".to_string(),
            scan_interval: 30,
            default_capacity: 4.0,
            capacities: BTreeMap::from([("dev-1".to_string(), 10.0)]),
        }
    }

    #[tokio::test]
    async fn setup_seeds_options_from_trial_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint::LOGIN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok"})))
            .mount(&server)
            .await;
        /* once for the credential check, once for the first refresh */
        Mock::given(method("GET"))
            .and(path(endpoint::DEVICES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"devid": "dev-1", "soc": 50}, {"devid": "dev-2", "soc": 20}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let state = setup(settings(server.uri())).await.unwrap();

        assert_eq!(
            BTreeMap::from([("dev-1".to_string(), 10.0), ("dev-2".to_string(), 4.0)]),
            state.options.capacities
        );
        assert!(state.coordinator.state().snapshot.is_some());
    }

    #[tokio::test]
    async fn setup_rejects_wrong_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint::LOGIN))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"msg": "wrong password"})),
            )
            .mount(&server)
            .await;

        assert_eq!(
            Some(IntakeError::InvalidAuth),
            setup(settings(server.uri())).await.err()
        );
    }
}
