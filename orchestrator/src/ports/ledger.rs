//! Port reservation ledger
//!
//! Authoritative record of which service owns which host port. Deployments
//! reserve a port before touching the host, then commit the reservation on
//! success or release it on failure. Ports are a host-wide resource: a port
//! held by one project can never be reserved by another.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::LedgerError;
use crate::models::project::Environment;
use crate::ports::ranges::PortRanges;
use crate::ports::store::{LedgerSnapshot, LedgerStore, PortCommitment, PortKey, PortReservation};
use crate::utils::generate_uuid;

const MAX_CAS_ATTEMPTS: u32 = 8;

/// Port ledger service
pub struct PortLedger {
    store: Arc<dyn LedgerStore>,
    ranges: PortRanges,
    reservation_ttl: Duration,
    writer: Mutex<()>,
}

impl PortLedger {
    /// Create a ledger over a backing store
    pub fn new(store: Arc<dyn LedgerStore>, ranges: PortRanges, reservation_ttl: Duration) -> Self {
        Self {
            store,
            ranges,
            reservation_ttl,
            writer: Mutex::new(()),
        }
    }

    /// Port ranges scanned by `find_next_available`
    pub fn ranges(&self) -> &PortRanges {
        &self.ranges
    }

    /// Claim `port` for `key` until the reservation TTL elapses.
    ///
    /// Fails with `PortInUse` when another key holds the port through a live
    /// reservation or a commitment. A live reservation previously made by the
    /// same key is replaced.
    pub async fn reserve(&self, key: &PortKey, port: u16) -> Result<PortReservation, LedgerError> {
        if port == 0 {
            return Err(LedgerError::Invalid("port 0 cannot be reserved".to_string()));
        }
        if key.project.is_empty() || key.service.is_empty() {
            return Err(LedgerError::Invalid(format!(
                "incomplete reservation key `{}`",
                key
            )));
        }

        let ttl = chrono::Duration::from_std(self.reservation_ttl)
            .map_err(|e| LedgerError::Invalid(e.to_string()))?;

        let reservation = self
            .mutate(|snapshot, now| {
                if let Some(holder) = snapshot.holder_excluding(port, key, now) {
                    return Err(LedgerError::PortInUse {
                        port,
                        holder: holder.to_string(),
                    });
                }

                snapshot.reservations.retain(|r| &r.key != key);
                let reservation = PortReservation {
                    token: generate_uuid(),
                    key: key.clone(),
                    port,
                    created_at: now,
                    expires_at: now + ttl,
                };
                snapshot.reservations.push(reservation.clone());
                Ok((reservation, true))
            })
            .await?;

        info!("Reserved port {} for {} ({})", port, key, reservation.token);
        Ok(reservation)
    }

    /// Turn a live reservation into a commitment.
    ///
    /// Supersedes any previous commitment of the same key. Returns false
    /// when the token is unknown or expired.
    pub async fn commit(&self, token: &str) -> Result<bool, LedgerError> {
        let committed = self
            .mutate(|snapshot, now| {
                let Some(index) = snapshot
                    .reservations
                    .iter()
                    .position(|r| r.token == token && r.is_live(now))
                else {
                    return Ok((None, false));
                };

                let reservation = snapshot.reservations.remove(index);
                snapshot
                    .commitments
                    .retain(|c| c.key != reservation.key && c.port != reservation.port);
                let commitment = PortCommitment {
                    key: reservation.key,
                    port: reservation.port,
                    committed_at: now,
                };
                snapshot.commitments.push(commitment.clone());
                Ok((Some(commitment), true))
            })
            .await?;

        match committed {
            Some(commitment) => {
                info!("Committed port {} for {}", commitment.port, commitment.key);
                Ok(true)
            }
            None => {
                warn!("Reservation {} is unknown or expired, nothing committed", token);
                Ok(false)
            }
        }
    }

    /// Drop a reservation. Unknown and expired tokens are ignored.
    pub async fn release(&self, token: &str) -> Result<(), LedgerError> {
        let released = self
            .mutate(|snapshot, _| {
                let before = snapshot.reservations.len();
                snapshot.reservations.retain(|r| r.token != token);
                let changed = snapshot.reservations.len() != before;
                Ok((changed, changed))
            })
            .await?;

        if released {
            debug!("Released reservation {}", token);
        }
        Ok(())
    }

    /// Drop the commitment of a key (teardown). Returns whether one existed.
    pub async fn release_commitment(&self, key: &PortKey) -> Result<bool, LedgerError> {
        let released = self
            .mutate(|snapshot, _| {
                let before = snapshot.commitments.len();
                snapshot.commitments.retain(|c| &c.key != key);
                let changed = snapshot.commitments.len() != before;
                Ok((changed, changed))
            })
            .await?;

        if released {
            info!("Released committed port of {}", key);
        }
        Ok(released)
    }

    /// Lowest free port of the range configured for `environment`/`service`
    pub async fn find_next_available(
        &self,
        environment: Environment,
        service: &str,
    ) -> Result<u16, LedgerError> {
        self.find_next_available_excluding(environment, service, &[])
            .await
    }

    /// Lowest free port of the range that is not in `excluded`
    pub async fn find_next_available_excluding(
        &self,
        environment: Environment,
        service: &str,
        excluded: &[u16],
    ) -> Result<u16, LedgerError> {
        let range = self
            .ranges
            .range_for(environment, service)
            .ok_or_else(|| LedgerError::NoAvailablePort {
                environment,
                service: service.to_string(),
            })?;

        let snapshot = self.store.load().await?;
        let now = Utc::now();
        range
            .iter()
            .find(|port| !excluded.contains(port) && snapshot.holder(*port, now).is_none())
            .ok_or_else(|| LedgerError::NoAvailablePort {
                environment,
                service: service.to_string(),
            })
    }

    /// Commitment held by a key
    pub async fn commitment_for(&self, key: &PortKey) -> Result<Option<PortCommitment>, LedgerError> {
        let snapshot = self.store.load().await?;
        Ok(snapshot.commitments.into_iter().find(|c| &c.key == key))
    }

    /// All commitments
    pub async fn commitments(&self) -> Result<Vec<PortCommitment>, LedgerError> {
        let mut commitments = self.store.load().await?.commitments;
        commitments.sort_by_key(|c| c.port);
        Ok(commitments)
    }

    /// Live reservations
    pub async fn reservations(&self) -> Result<Vec<PortReservation>, LedgerError> {
        let now = Utc::now();
        let mut reservations: Vec<_> = self
            .store
            .load()
            .await?
            .reservations
            .into_iter()
            .filter(|r| r.is_live(now))
            .collect();
        reservations.sort_by_key(|r| r.port);
        Ok(reservations)
    }

    /// Read-modify-write with check-and-set on the snapshot revision.
    ///
    /// `apply` may run several times; it returns its result and whether the
    /// snapshot has to be written back.
    async fn mutate<R, F>(&self, mut apply: F) -> Result<R, LedgerError>
    where
        F: FnMut(&mut LedgerSnapshot, DateTime<Utc>) -> Result<(R, bool), LedgerError>,
    {
        let _writer = self.writer.lock().await;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut snapshot = self.store.load().await?;
            let revision = snapshot.revision;
            let now = Utc::now();
            let before = snapshot.reservations.len();
            snapshot.purge_expired(now);
            let purged = snapshot.reservations.len() != before;

            let (result, changed) = apply(&mut snapshot, now)?;
            if !changed && !purged {
                return Ok(result);
            }

            if self.store.compare_and_swap(revision, snapshot).await? {
                return Ok(result);
            }
            debug!("Ledger write conflict on attempt {}, retrying", attempt);
        }

        Err(LedgerError::Unavailable(format!(
            "ledger still contended after {} attempts",
            MAX_CAS_ATTEMPTS
        )))
    }
}

impl LedgerSnapshot {
    /// Holder of `port` other than `key`
    fn holder_excluding(&self, port: u16, key: &PortKey, now: DateTime<Utc>) -> Option<&PortKey> {
        self.commitments
            .iter()
            .filter(|c| c.port == port)
            .map(|c| &c.key)
            .chain(
                self.reservations
                    .iter()
                    .filter(|r| r.port == port && r.is_live(now))
                    .map(|r| &r.key),
            )
            .find(|holder| *holder != key)
    }
}
