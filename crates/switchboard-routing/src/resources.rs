//! Host resource sampling.
//!
//! Sampling is synchronous and cheap; callers take a fresh reading for every
//! decision and never cache it.

use std::fs;
use std::path::{Path, PathBuf};

use num_cpus::get as get_cpu_count;
use tracing::debug;

use crate::config::ResourceConfig;
use crate::types::{BatteryState, ResourceState};

/// Free RAM assumed when the platform does not report it.
const FALLBACK_RAM_MB: u64 = 8_192;
/// CPU utilization assumed when load cannot be read.
const FALLBACK_CPU_PERCENT: f64 = 50.0;

/// Source of [`ResourceState`] readings.
pub trait ResourceMonitor: Send + Sync {
    /// Takes a fresh reading.
    fn sample(&self) -> ResourceState;
}

/// Reads Linux `/proc` and `/sys` files; other platforms get conservative defaults.
#[derive(Debug, Clone)]
pub struct SystemMonitor {
    root: PathBuf,
    gpu_available: bool,
    gpu_layers: u32,
}

impl SystemMonitor {
    /// Monitor reporting GPU capabilities from `config`.
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            root: PathBuf::from("/"),
            gpu_available: config.gpu_available,
            gpu_layers: config.gpu_layers,
        }
    }

    /// Reads `proc/` and `sys/` below `root` instead of `/`.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    fn read(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.root.join(relative)).ok()
    }

    fn available_ram_mb(&self) -> Option<u64> {
        let meminfo = self.read("proc/meminfo")?;
        let field = |name: &str| {
            meminfo.lines().find_map(|line| {
                let rest = line.strip_prefix(name)?.strip_prefix(':')?;
                rest.split_whitespace().next()?.parse::<u64>().ok()
            })
        };
        field("MemAvailable")
            .or_else(|| field("MemFree"))
            .map(|kilobytes| kilobytes / 1024)
    }

    fn cpu_usage_percent(&self, threads: usize) -> Option<f64> {
        let loadavg = self.read("proc/loadavg")?;
        let one_minute: f64 = loadavg.split_whitespace().next()?.parse().ok()?;
        Some((one_minute / threads.max(1) as f64 * 100.0).clamp(0.0, 100.0))
    }

    fn temperature_celsius(&self) -> Option<f64> {
        let raw = self.read("sys/class/thermal/thermal_zone0/temp")?;
        let millidegrees: f64 = raw.trim().parse().ok()?;
        Some(millidegrees / 1000.0)
    }

    fn battery(&self) -> Option<BatteryState> {
        let supplies = self.root.join("sys/class/power_supply");
        let entries = fs::read_dir(&supplies).ok()?;
        let battery_dir = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("BAT"))
            })
            .min()?;
        read_battery(&battery_dir)
    }
}

fn read_battery(directory: &Path) -> Option<BatteryState> {
    let capacity: f64 = fs::read_to_string(directory.join("capacity"))
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let status = fs::read_to_string(directory.join("status")).unwrap_or_default();
    Some(BatteryState {
        level_percent: capacity,
        on_battery: status.trim().eq_ignore_ascii_case("discharging"),
    })
}

impl ResourceMonitor for SystemMonitor {
    fn sample(&self) -> ResourceState {
        let cpu_threads = get_cpu_count();
        let state = ResourceState {
            available_ram_mb: self.available_ram_mb().unwrap_or(FALLBACK_RAM_MB),
            gpu_available: self.gpu_available,
            gpu_layers: if self.gpu_available { self.gpu_layers } else { 0 },
            cpu_threads,
            cpu_usage_percent: self
                .cpu_usage_percent(cpu_threads)
                .unwrap_or(FALLBACK_CPU_PERCENT),
            temperature_celsius: self.temperature_celsius(),
            battery: self.battery(),
        };
        debug!(?state, "sampled resources");
        state
    }
}

/// Returns the same reading every time.
#[derive(Debug, Clone)]
pub struct StaticMonitor {
    state: ResourceState,
}

impl StaticMonitor {
    pub fn new(state: ResourceState) -> Self {
        Self { state }
    }
}

impl ResourceMonitor for StaticMonitor {
    fn sample(&self) -> ResourceState {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent()
            && let Err(error) = fs::create_dir_all(parent)
        {
            panic!("mkdir failed: {error}");
        }
        if let Err(error) = fs::write(&path, contents) {
            panic!("write failed: {error}");
        }
    }

    fn fake_root() -> TempDir {
        match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("temp dir failed: {error}"),
        }
    }

    #[test]
    fn test_reads_fake_proc() {
        let root = fake_root();
        write(
            root.path(),
            "proc/meminfo",
            "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4096000 kB\n",
        );
        write(root.path(), "proc/loadavg", "0.00 0.10 0.20 1/100 12345\n");
        write(root.path(), "sys/class/thermal/thermal_zone0/temp", "71500\n");
        write(root.path(), "sys/class/power_supply/BAT0/capacity", "15\n");
        write(root.path(), "sys/class/power_supply/BAT0/status", "Discharging\n");

        let monitor = SystemMonitor::new(&ResourceConfig::default()).with_root(root.path());
        let state = monitor.sample();

        assert_eq!(state.available_ram_mb, 4_000);
        assert!(state.cpu_usage_percent.abs() < f64::EPSILON);
        assert_eq!(state.temperature_celsius, Some(71.5));
        let battery = match state.battery {
            Some(battery) => battery,
            None => panic!("battery not detected"),
        };
        assert!(battery.on_battery);
        assert!((battery.level_percent - 15.0).abs() < f64::EPSILON);
        assert!(!state.gpu_available);
        assert_eq!(state.gpu_layers, 0);
    }

    #[test]
    fn test_missing_files_fall_back() {
        let root = fake_root();
        let mut config = ResourceConfig::default();
        config.gpu_available = true;
        config.gpu_layers = 33;
        let state = SystemMonitor::new(&config).with_root(root.path()).sample();

        assert_eq!(state.available_ram_mb, FALLBACK_RAM_MB);
        assert!((state.cpu_usage_percent - FALLBACK_CPU_PERCENT).abs() < f64::EPSILON);
        assert_eq!(state.temperature_celsius, None);
        assert_eq!(state.battery, None);
        assert_eq!(state.gpu_layers, 33);
    }

    #[test]
    fn test_static_monitor() {
        let state = ResourceState::unconstrained().with_ram(1_234);
        assert_eq!(StaticMonitor::new(state.clone()).sample(), state);
    }
}
