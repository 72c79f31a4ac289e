//! Process environment control: core affinity and sysfs introspection.

use std::io::Read;

/// Utilities for controlling and inspecting the state of the current
/// process and the machine it runs on.
pub struct BenchEnv;

impl BenchEnv {
    const BOOST_PATH: &'static str = "/sys/devices/system/cpu/cpufreq/boost";
    const ISOLATED_PATH: &'static str = "/sys/devices/system/cpu/isolated";
    const NOHZ_PATH: &'static str = "/sys/devices/system/cpu/nohz_full";
    const SMT_PATH: &'static str = "/sys/devices/system/cpu/smt/control";

    /// Number of online logical CPUs (1 if it cannot be determined).
    pub fn num_online_cpus() -> usize {
        nix::unistd::sysconf(nix::unistd::SysconfVar::_NPROCESSORS_ONLN)
            .ok()
            .flatten()
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(1)
    }

    /// One logical CPU per physical core.
    ///
    /// Assumes SMT siblings are numbered adjacently (0/1, 2/3, ...), so
    /// even-indexed IDs land on distinct physical cores. That does not
    /// hold for every topology; when nothing can be determined the
    /// fallback is CPU 0.
    pub fn physical_core_ids() -> Vec<usize> {
        let n = Self::num_online_cpus();
        let ids: Vec<usize> = (0..n).step_by(2).collect();
        if ids.is_empty() {
            vec![0]
        } else {
            ids
        }
    }

    /// Pin the calling thread to a particular core.
    pub fn pin_to_core(core: usize) -> Result<(), String> {
        let this_pid = nix::unistd::Pid::from_raw(0);
        let mut cpuset = nix::sched::CpuSet::new();
        cpuset
            .set(core)
            .map_err(|errno| format!("invalid core {}: {}", core, errno.desc()))?;
        nix::sched::sched_setaffinity(this_pid, &cpuset)
            .map_err(|errno| format!("setaffinity returned {:?} - {}", errno, errno.desc()))
    }

    fn read_sysfs(path: &str) -> Result<String, std::io::ErrorKind> {
        let mut f = std::fs::File::open(path).map_err(|e| e.kind())?;
        let mut res = String::new();
        f.read_to_string(&mut res).map_err(|e| e.kind())?;
        Ok(res.trim().to_string())
    }

    /// Returns true if SMT is enabled.
    pub fn sysfs_smt_enabled() -> Result<bool, std::io::ErrorKind> {
        match Self::read_sysfs(Self::SMT_PATH)?.as_str() {
            "on" => Ok(true),
            _ => Ok(false),
        }
    }

    /// Returns true if cpufreq boost is enabled.
    pub fn sysfs_cpufreq_boost_enabled() -> Result<bool, std::io::ErrorKind> {
        match Self::read_sysfs(Self::BOOST_PATH)?.as_str() {
            "1" => Ok(true),
            _ => Ok(false),
        }
    }

    /// Return the cpufreq scaling strategy for a particular core.
    pub fn sysfs_cpufreq_governor(n: usize) -> Result<String, std::io::ErrorKind> {
        let path = format!(
            "/sys/devices/system/cpu/cpufreq/policy{}/scaling_governor",
            n
        );
        Self::read_sysfs(&path)
    }

    /// Return a string describing the set of isolated cores.
    pub fn sysfs_isolated() -> Result<String, std::io::ErrorKind> {
        let res = Self::read_sysfs(Self::ISOLATED_PATH)?;
        Ok(match res.as_str() {
            "" => "disabled".to_string(),
            _ => res,
        })
    }

    /// Return a string describing the set of 'nohz_full' cores.
    pub fn sysfs_nohz() -> Result<String, std::io::ErrorKind> {
        let res = Self::read_sysfs(Self::NOHZ_PATH)?;
        Ok(match res.as_str() {
            "" => "disabled".to_string(),
            _ => res,
        })
    }
}
