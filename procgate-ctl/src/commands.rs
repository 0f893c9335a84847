use console::style;
use log::info;
use procgate_core::capabilities::SystemCapabilities;

pub fn check_requirements() {
    info!("Checking monitor requirements");
    println!("Checking monitor requirements...\n");

    let caps = SystemCapabilities::detect();
    println!("{}", caps.summary());
    println!();

    if caps.can_monitor() {
        println!("{}", style("This host can run the monitor").green());
    } else {
        println!(
            "{}",
            style("This host cannot run the monitor").red().bold()
        );
        if !caps.has_root {
            println!("  attaching to spawners requires root");
        }
        if caps.yama_scope == Some(3) {
            println!("  kernel.yama.ptrace_scope=3 disables ptrace attach entirely");
        }
    }
}
