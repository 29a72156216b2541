//! Process-wide region state shared by every session.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::bms::{MapDefinition, MapLibrary};
use crate::config::RegionConfig;
use crate::program::ProgramRegistry;
use crate::queues::{SpoolFile, SpoolSink, StartQueue, StartRequest, TdQueueManager};
use crate::registry::{DestinationRegistry, TransactionRegistry};
use crate::runtime::{RegionClock, ResourceLockTable};
use crate::{CicsError, CicsResult};

/// A CICS region: configuration, registries and shared resources.
///
/// Registries are immutable once the region is built. The lock table,
/// queues and maps synchronize internally.
#[derive(Debug)]
pub struct Region {
    config: RegionConfig,
    transactions: TransactionRegistry,
    destinations: DestinationRegistry,
    programs: ProgramRegistry,
    maps: MapLibrary,
    locks: ResourceLockTable,
    td_queues: TdQueueManager,
    starts: StartQueue,
    spools: SpoolSink,
    clock: RegionClock,
    next_task: AtomicU64,
    next_session: AtomicU64,
}

impl Region {
    /// Build a region from its configuration and the programs it can run.
    pub fn new(config: RegionConfig, programs: ProgramRegistry) -> CicsResult<Self> {
        config.validate()?;
        let clock = RegionClock::from_setting(config.region.application_date.as_deref())?;

        let error_maps: HashSet<String> = config
            .error_maps
            .iter()
            .map(|name| name.trim().to_uppercase())
            .collect();
        let maps = MapLibrary::new();
        for spec in &config.maps {
            let mut map = MapDefinition::from_spec(spec.clone())?;
            if error_maps.contains(&map.qualified_name()) {
                map = map.as_error_map();
            }
            maps.register(map);
        }
        for name in &error_maps {
            let (mapset, map) = name.split_once('.').unwrap_or((name.as_str(), ""));
            if maps.get(mapset, map).is_err() {
                return Err(CicsError::Config(format!("error map '{name}' is not defined")));
            }
        }

        let transactions = TransactionRegistry::new(&config.transactions);
        for code in config.transactions.keys() {
            if let Ok(program) = transactions.resolve(code) {
                if !programs.exists(program) {
                    warn!(transid = %code, program, "Transaction program is not registered");
                }
            }
        }

        let region = Self {
            transactions,
            destinations: DestinationRegistry::new(config.destinations.iter().cloned()),
            locks: ResourceLockTable::new(Duration::from_millis(config.region.lock_poll_interval_ms)),
            programs,
            maps,
            td_queues: TdQueueManager::new(),
            starts: StartQueue::new(),
            spools: SpoolSink::new(),
            clock,
            next_task: AtomicU64::new(1),
            next_session: AtomicU64::new(1),
            config,
        };
        info!(
            transactions = region.transactions.len(),
            programs = region.programs.len(),
            maps = region.maps.len(),
            destinations = region.destinations.len(),
            "CICS region ready"
        );
        Ok(region)
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn transactions(&self) -> &TransactionRegistry {
        &self.transactions
    }

    pub fn destinations(&self) -> &DestinationRegistry {
        &self.destinations
    }

    pub fn programs(&self) -> &ProgramRegistry {
        &self.programs
    }

    pub fn maps(&self) -> &MapLibrary {
        &self.maps
    }

    pub fn locks(&self) -> &ResourceLockTable {
        &self.locks
    }

    pub fn td_queues(&self) -> &TdQueueManager {
        &self.td_queues
    }

    pub fn clock(&self) -> &RegionClock {
        &self.clock
    }

    /// Register a map after startup.
    pub fn register_map(&self, map: MapDefinition) {
        self.maps.register(map);
    }

    /// Queue a START request.
    pub fn queue_start(&self, request: StartRequest) {
        self.starts.push(request);
    }

    /// Take the queued START requests, oldest first.
    pub fn take_start_requests(&self) -> Vec<StartRequest> {
        self.starts.drain()
    }

    pub fn submit_spool(&self, file: SpoolFile) {
        self.spools.submit(file);
    }

    /// Take the closed spool files.
    pub fn take_spool_files(&self) -> Vec<SpoolFile> {
        self.spools.drain()
    }

    /// Next task number (EIBTASKN).
    pub fn next_task_number(&self) -> u64 {
        self.next_task.fetch_add(1, Ordering::Relaxed)
    }

    /// Next session id; sessions own resource locks under this id.
    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bms::{FieldControl, MapSpec};
    use crate::program::Outcome;

    fn programs() -> ProgramRegistry {
        let mut programs = ProgramRegistry::new();
        programs.register_fn("CT02P000", |_ctx| Ok(Outcome::Normal));
        programs
    }

    #[test]
    fn test_region_from_config() {
        let mut config = RegionConfig::default().with_transaction("CT02", "CT02P000");
        config.maps.push(MapSpec {
            mapset: "ERRSET".into(),
            name: "ERRMAP".into(),
            error_map: false,
            fields: vec![FieldControl::new("ERRMSG", 24, 1, 78)],
        });
        config.error_maps.push("errset.errmap".into());

        let region = Region::new(config, programs()).unwrap();
        assert_eq!(region.transactions().resolve("CT02").unwrap(), "CT02P000");
        assert!(region.maps().is_error_map("ERRSET", "ERRMAP"));
        assert_eq!(region.next_task_number(), 1);
        assert_eq!(region.next_task_number(), 2);
    }

    #[test]
    fn test_undefined_error_map_rejected() {
        let mut config = RegionConfig::default();
        config.error_maps.push("NOSET.NOMAP".into());
        let err = Region::new(config, programs()).unwrap_err();
        assert!(matches!(err, CicsError::Config(_)));
    }

    #[test]
    fn test_bad_application_date_rejected() {
        let mut config = RegionConfig::default();
        config.region.application_date = Some("yesterday".into());
        assert!(Region::new(config, programs()).is_err());
    }
}
