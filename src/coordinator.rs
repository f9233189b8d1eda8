use crate::api::{Client, Error};
use crate::intake::{self, IntakeError};
use crate::model::{DeviceRecord, Snapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const MIN_SCAN_INTERVAL_SECS: u64 = 10;
pub const MAX_SCAN_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;

/// What consumers see after each refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    /// Last successful poll. Survives failed cycles.
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_update_success: bool,
    pub last_latency_ms: Option<f64>,
    /// Set once the vendor rejected the credentials; the loop stops until reconfigured.
    pub reauth_required: bool,
    pub last_error: Option<Error>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Updated,
    /// Updated after one or more failed cycles.
    Recovered,
    Failed(Error),
    AuthFailed(Error),
    /// Torn down while the fetch was in flight; nothing was recorded.
    Cancelled,
}

/// Drives the periodic refresh of one account and publishes the current snapshot.
pub struct Coordinator {
    client: Client,
    interval: Duration,
    capacities: BTreeMap<String, f64>,
    default_capacity: f64,
    state: watch::Sender<CoordinatorState>,
    /* serialises refresh cycles */
    cycle: Mutex<()>,
    cancel: CancellationToken,
}

/// Elapsed time in milliseconds, rounded to one decimal.
fn latency_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 10_000.0).round() / 10.0
}

impl Coordinator {
    /// `capacities` maps devid to kWh; other devices get `default_capacity`.
    ///
    /// Fails when the interval or any capacity lies outside what the options form allows.
    pub fn new(
        client: Client,
        scan_interval_secs: u64,
        capacities: BTreeMap<String, f64>,
        default_capacity: f64,
    ) -> Result<Coordinator, IntakeError> {
        let scan_interval_secs = intake::validate_scan_interval(scan_interval_secs as i64)?;
        intake::validate_capacity(default_capacity)?;
        for capacity in capacities.values() {
            intake::validate_capacity(*capacity)?;
        }

        Ok(Coordinator::build(
            client,
            Duration::from_secs(scan_interval_secs),
            capacities,
            default_capacity,
        ))
    }

    fn build(
        client: Client,
        interval: Duration,
        capacities: BTreeMap<String, f64>,
        default_capacity: f64,
    ) -> Coordinator {
        let (state, _) = watch::channel(CoordinatorState::default());
        Coordinator {
            client,
            interval,
            capacities,
            default_capacity,
            state,
            cycle: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Current record for `devid`, resolved against the latest snapshot.
    pub fn device(&self, devid: &str) -> Option<DeviceRecord> {
        self.state
            .borrow()
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.device(devid).cloned())
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the loop. Any refresh still in flight will not touch the state.
    pub fn shutdown(&self) {
        log::debug!("coordinator shutting down");
        self.cancel.cancel();
    }

    fn apply_capacities(&self, devices: &mut [DeviceRecord]) {
        for device in devices.iter_mut() {
            let capacity = self
                .capacities
                .get(&device.devid)
                .copied()
                .unwrap_or(self.default_capacity);
            device.capacity_kwh = Some(capacity);
            /* a vendor field of the same name would serialize twice */
            device.extra.remove("capacity_kwh");
        }
    }

    /// Initial refresh at setup. Unlike scheduled cycles, a failure is returned.
    pub async fn first_refresh(&self) -> Result<Arc<Snapshot>, Error> {
        match self.refresh().await {
            CycleOutcome::Updated | CycleOutcome::Recovered => self
                .state
                .borrow()
                .snapshot
                .clone()
                .ok_or_else(|| Error::ApiError("No snapshot after refresh".to_string())),
            CycleOutcome::Failed(e) | CycleOutcome::AuthFailed(e) => Err(e),
            CycleOutcome::Cancelled => Err(Error::ApiError("Coordinator shut down".to_string())),
        }
    }

    /// Run one refresh cycle and record its result.
    pub async fn refresh(&self) -> CycleOutcome {
        let _cycle = self.cycle.lock().await;

        if self.is_shut_down() {
            return CycleOutcome::Cancelled;
        }

        let start = Instant::now();
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return CycleOutcome::Cancelled,
            result = self.client.fetch_devices() => result,
        };

        if self.is_shut_down() {
            return CycleOutcome::Cancelled;
        }

        match result {
            Ok(mut devices) => {
                let latency = latency_ms(start);
                self.apply_capacities(&mut devices);
                let snapshot = Arc::new(Snapshot {
                    devices,
                    latency_ms: latency,
                    fetched_at: SystemTime::now(),
                });

                let mut recovered = false;
                self.state.send_modify(|state| {
                    recovered = state.last_error.is_some();
                    state.snapshot = Some(snapshot);
                    state.last_update_success = true;
                    state.last_latency_ms = Some(latency);
                    state.reauth_required = false;
                    state.last_error = None;
                });

                if recovered {
                    log::info!("Marstek API reachable again after failed update(s)");
                    CycleOutcome::Recovered
                } else {
                    log::debug!("refresh finished in {} ms", latency);
                    CycleOutcome::Updated
                }
            }
            Err(e) => {
                let auth = e.is_auth();
                self.state.send_modify(|state| {
                    state.last_update_success = false;
                    state.reauth_required = auth;
                    state.last_error = Some(e.clone());
                });

                if auth {
                    log::error!("{}; re-authentication required", e);
                    CycleOutcome::AuthFailed(e)
                } else {
                    log::warn!("Error fetching Marstek data: {}", e);
                    CycleOutcome::Failed(e)
                }
            }
        }
    }

    /// Refresh every `interval` until shut down or the credentials are rejected.
    ///
    /// The first tick is skipped, setup is expected to have called `first_refresh`.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let CycleOutcome::AuthFailed(_) = self.refresh().await {
                        break;
                    }
                }
            }
        }

        log::info!("Marstek refresh loop stopped");
    }
}
