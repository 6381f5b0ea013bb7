//! Host resource metrics via `sysinfo`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sysinfo::{Disks, Networks, System};
use tracing::{debug, instrument};

use super::{CollectionError, Collector};
use crate::MetricSample;

pub const SYSTEM_COLLECTOR: &str = "system";

/// Raw readings of one refresh, before they are turned into samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSnapshot {
    pub cpu_usage_percent: f64,
    pub cpu_count: usize,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_available: u64,
    pub disk_total: u64,
    pub disk_free: u64,
    pub network_bytes_sent: u64,
    pub network_bytes_recv: u64,
    pub network_packets_sent: u64,
    pub network_packets_recv: u64,
    pub load: Option<[f64; 3]>,
}

impl SystemSnapshot {
    fn read(sys: &mut System) -> Self {
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_free) = disks.iter().fold((0u64, 0u64), |(total, free), disk| {
            (
                total.saturating_add(disk.total_space()),
                free.saturating_add(disk.available_space()),
            )
        });

        let networks = Networks::new_with_refreshed_list();
        let mut snapshot = Self {
            cpu_usage_percent: sys.global_cpu_usage() as f64,
            cpu_count: sys.cpus().len(),
            memory_total: sys.total_memory(),
            memory_used: sys.used_memory(),
            memory_available: sys.available_memory(),
            disk_total,
            disk_free,
            ..Default::default()
        };

        for (_, data) in networks.iter() {
            snapshot.network_bytes_sent += data.total_transmitted();
            snapshot.network_bytes_recv += data.total_received();
            snapshot.network_packets_sent += data.total_packets_transmitted();
            snapshot.network_packets_recv += data.total_packets_received();
        }

        // Load averages are all zero on platforms without them (Windows).
        let load = System::load_average();
        if cfg!(unix) {
            snapshot.load = Some([load.one, load.five, load.fifteen]);
        }

        snapshot
    }

    /// Converts the snapshot into samples stamped with `timestamp`.
    pub fn into_samples(self, timestamp: DateTime<Utc>) -> Vec<MetricSample> {
        let disk_used = self.disk_total.saturating_sub(self.disk_free);

        let mut values = vec![
            ("cpu.usage_percent", self.cpu_usage_percent),
            ("cpu.count", self.cpu_count as f64),
            ("memory.total_bytes", self.memory_total as f64),
            ("memory.used_bytes", self.memory_used as f64),
            ("memory.available_bytes", self.memory_available as f64),
            ("memory.percent", percent(self.memory_used, self.memory_total)),
            ("disk.total_bytes", self.disk_total as f64),
            ("disk.used_bytes", disk_used as f64),
            ("disk.free_bytes", self.disk_free as f64),
            ("disk.percent", percent(disk_used, self.disk_total)),
            ("network.bytes_sent", self.network_bytes_sent as f64),
            ("network.bytes_recv", self.network_bytes_recv as f64),
            ("network.packets_sent", self.network_packets_sent as f64),
            ("network.packets_recv", self.network_packets_recv as f64),
        ];

        if let Some([one, five, fifteen]) = self.load {
            values.extend([("load.1", one), ("load.5", five), ("load.15", fifteen)]);
        }

        values
            .into_iter()
            .filter(|(_, value)| value.is_finite())
            .map(|(name, value)| MetricSample::new(name, value, timestamp, SYSTEM_COLLECTOR))
            .collect()
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Collects CPU, memory, disk, network and load metrics of the local host.
///
/// The `System` handle is kept between ticks. Reading blocks for
/// `MINIMUM_CPU_UPDATE_INTERVAL`, so it runs on the blocking pool.
pub struct SystemCollector {
    system: Arc<Mutex<System>>,
    timeout: Option<Duration>,
}

impl SystemCollector {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            timeout,
        }
    }
}

#[async_trait]
impl Collector for SystemCollector {
    fn name(&self) -> &str {
        SYSTEM_COLLECTOR
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[instrument(skip(self))]
    async fn collect(&self) -> Result<Vec<MetricSample>, CollectionError> {
        let system = Arc::clone(&self.system);

        let snapshot = tokio::task::spawn_blocking(move || {
            let mut sys = system
                .lock()
                .map_err(|_| CollectionError::Failed("system handle poisoned".to_string()))?;
            Ok::<_, CollectionError>(SystemSnapshot::read(&mut sys))
        })
        .await
        .map_err(|e| CollectionError::Failed(format!("system collector task failed: {e}")))??;

        let samples = snapshot.into_samples(Utc::now());
        debug!("collected {} system metrics", samples.len());
        Ok(samples)
    }
}
