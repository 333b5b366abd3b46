use serde::Serialize;
use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use sysinfo::{Pid, RefreshKind, System};

/// 單一階段的耗時紀錄
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SystemStats {
    pub cpu_usage: f32,
    pub memory_usage_mb: u64,
    pub peak_memory_mb: u64,
    pub elapsed_time: Duration,
}

/// Per-run stage timer. With the `cli` feature and sampling enabled it also
/// reads process CPU and memory through `sysinfo`.
pub struct RunMonitor {
    start_time: Instant,
    stage_start: Option<(String, Instant)>,
    timings: Vec<StageTiming>,
    #[cfg(feature = "cli")]
    sampler: Option<Sampler>,
}

#[cfg(feature = "cli")]
struct Sampler {
    system: Mutex<System>,
    pid: Pid,
    peak_memory_mb: Mutex<u64>,
}

impl RunMonitor {
    pub fn new(system_stats: bool) -> Self {
        #[cfg(not(feature = "cli"))]
        let _ = system_stats;

        Self {
            start_time: Instant::now(),
            stage_start: None,
            timings: Vec::new(),
            #[cfg(feature = "cli")]
            sampler: if system_stats { Sampler::new() } else { None },
        }
    }

    pub fn begin_stage(&mut self, stage: &str) {
        self.finish_stage();
        self.stage_start = Some((stage.to_string(), Instant::now()));
    }

    /// 結束目前階段並記錄耗時；沒有進行中的階段時不做任何事
    pub fn finish_stage(&mut self) {
        if let Some((stage, started)) = self.stage_start.take() {
            let elapsed = started.elapsed();
            tracing::debug!(stage = %stage, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
            self.log_stats(&stage);
            self.timings.push(StageTiming {
                stage,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
    }

    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_sampling(&self) -> bool {
        #[cfg(feature = "cli")]
        {
            self.sampler.is_some()
        }
        #[cfg(not(feature = "cli"))]
        {
            false
        }
    }

    pub fn get_stats(&self) -> Option<SystemStats> {
        #[cfg(feature = "cli")]
        {
            let sampler = self.sampler.as_ref()?;
            let (cpu_usage, memory_usage_mb, peak_memory_mb) = sampler.sample()?;
            Some(SystemStats {
                cpu_usage,
                memory_usage_mb,
                peak_memory_mb,
                elapsed_time: self.elapsed(),
            })
        }
        #[cfg(not(feature = "cli"))]
        {
            None
        }
    }

    fn log_stats(&self, phase: &str) {
        if let Some(stats) = self.get_stats() {
            tracing::info!(
                "📊 {} - CPU: {:.1}%, Memory: {}MB, Peak: {}MB, Time: {:?}",
                phase,
                stats.cpu_usage,
                stats.memory_usage_mb,
                stats.peak_memory_mb,
                stats.elapsed_time
            );
        }
    }

    pub fn log_final_stats(&self) {
        if let Some(stats) = self.get_stats() {
            tracing::info!(
                "📊 Final Stats - Total Time: {:?}, Peak Memory: {}MB",
                stats.elapsed_time,
                stats.peak_memory_mb
            );
        }
    }
}

impl Default for RunMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(feature = "cli")]
impl Sampler {
    fn new() -> Option<Self> {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!("System monitoring unavailable: {}", e);
                return None;
            }
        };

        let mut system = System::new_with_specifics(RefreshKind::everything());
        system.refresh_all();

        Some(Self {
            system: Mutex::new(system),
            pid,
            peak_memory_mb: Mutex::new(0),
        })
    }

    fn sample(&self) -> Option<(f32, u64, u64)> {
        let mut system = self.system.lock().ok()?;
        system.refresh_all();

        let process = system.process(self.pid)?;
        let memory_mb = process.memory() / 1024 / 1024;

        let mut peak = self.peak_memory_mb.lock().ok()?;
        if memory_mb > *peak {
            *peak = memory_mb;
        }

        Some((process.cpu_usage(), memory_mb, *peak))
    }
}
