use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use discovery::{build_discovery, resolve, DiscoveryConfig, DiscoveryTracker};
use mqtt_publisher::PublishSink;
use types::{DecodedEvent, DeviceIdentity};

/// What happened to one decoder line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a JSON object; nothing was published.
    Malformed,
    /// No identity could be derived; nothing was published.
    Anonymous,
    /// The raw line went to the state topic. `announced` counts the discovery
    /// messages the sink accepted for this line, zero for known devices.
    Forwarded {
        identity: DeviceIdentity,
        announced: usize,
    },
}

/// Turns decoder lines into discovery and state publishes, one line at a time.
pub struct Dispatcher<P> {
    publisher: P,
    tracker: DiscoveryTracker,
    config: DiscoveryConfig,
}

impl<P: PublishSink> Dispatcher<P> {
    pub fn new(publisher: P, config: DiscoveryConfig) -> Self {
        Self::with_tracker(publisher, config, DiscoveryTracker::new())
    }

    pub fn with_tracker(publisher: P, config: DiscoveryConfig, tracker: DiscoveryTracker) -> Self {
        Self {
            publisher,
            tracker,
            config,
        }
    }

    pub fn tracker(&self) -> &DiscoveryTracker {
        &self.tracker
    }

    pub fn handle(&mut self, line: &str) -> DispatchOutcome {
        let event = match DecodedEvent::parse(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(line = %line, error = %err, "invalid JSON received from decoder");
                return DispatchOutcome::Malformed;
            }
        };

        let Some(identity) = resolve(&event) else {
            debug!(line = %line, "no device identity, dropping line");
            return DispatchOutcome::Anonymous;
        };

        let announced = if self.tracker.mark_if_new(&identity) {
            info!(identity = %identity, "discovered new sensor");
            self.announce(&event, &identity)
        } else {
            0
        };

        let state_topic = self.config.state_topic(&identity);
        if let Err(err) = self.publisher.publish(&state_topic, line.as_bytes(), false) {
            warn!(topic = %state_topic, error = %err, "state publish failed");
        }

        DispatchOutcome::Forwarded {
            identity,
            announced,
        }
    }

    fn announce(&self, event: &DecodedEvent, identity: &DeviceIdentity) -> usize {
        let discovery = build_discovery(event, identity, &self.config);
        let mut announced = 0;

        for (topic, entity) in &discovery.entities {
            let payload = match discovery.payload(entity) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(topic = %topic, error = %err, "discovery payload encode failed");
                    continue;
                }
            };

            match self
                .publisher
                .publish(topic, payload.as_bytes(), self.config.retain)
            {
                Ok(()) => announced += 1,
                Err(err) => warn!(topic = %topic, error = %err, "discovery publish failed"),
            }
        }

        debug!(
            identity = %identity,
            entities = discovery.entities.len(),
            announced,
            "device announced"
        );
        announced
    }

    /// Handles lines in arrival order until the channel closes or shutdown
    /// is flagged.
    pub async fn run(mut self, mut lines: mpsc::Receiver<String>, mut shutdown: watch::Receiver<bool>) {
        let mut handled = 0u64;
        let mut malformed = 0u64;

        loop {
            tokio::select! {
                maybe_line = lines.recv() => {
                    match maybe_line {
                        Some(line) => {
                            handled = handled.saturating_add(1);
                            if self.handle(&line) == DispatchOutcome::Malformed {
                                malformed = malformed.saturating_add(1);
                            }
                        }
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("dispatcher shutdown requested");
                        break;
                    }
                }
            }
        }

        info!(
            handled,
            malformed,
            devices = self.tracker.len(),
            "dispatcher stopped"
        );
    }
}
