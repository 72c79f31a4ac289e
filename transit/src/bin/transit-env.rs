//! Print a summary of the machine state relevant to benchmarking.

use transit::BenchEnv;

fn or_unknown(res: Result<String, std::io::ErrorKind>) -> String {
    match res {
        Ok(s) => s,
        Err(std::io::ErrorKind::PermissionDenied) => "<read error; are you root?>".to_string(),
        Err(e) => format!("<unavailable: {:?}>", e),
    }
}

fn main() {
    let num_cores = BenchEnv::num_online_cpus();
    let pin_candidates = BenchEnv::physical_core_ids()
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let isol = or_unknown(BenchEnv::sysfs_isolated());
    let nohz = or_unknown(BenchEnv::sysfs_nohz());
    let smt = match BenchEnv::sysfs_smt_enabled() {
        Ok(true) => "enabled [!!]".to_string(),
        Ok(false) => "disabled".to_string(),
        Err(e) => format!("<unavailable: {:?}>", e),
    };
    let boost = match BenchEnv::sysfs_cpufreq_boost_enabled() {
        Ok(true) => "enabled [!!]".to_string(),
        Ok(false) => "disabled".to_string(),
        Err(e) => format!("<unavailable: {:?}>", e),
    };
    let gov = or_unknown(BenchEnv::sysfs_cpufreq_governor(0));

    println!("[*] 'transit' environment summary:");
    println!("  {:<40}: {}", "online cores", num_cores);
    println!("  {:<40}: {}", "pin candidates (one per phys. core)", pin_candidates);
    println!("  {:<40}: {}", "isolated cores", isol);
    println!("  {:<40}: {}", "nohz_full cores", nohz);
    println!("  {:<40}: {}", "simultaneous multithreading (SMT)", smt);
    println!("  {:<40}: {}", "cpufreq boost", boost);
    println!("  {:<40}: {}", "cpufreq scaling (policy0)", gov);
}
