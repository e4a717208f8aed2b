// Print debug events until the remote side goes away
//
// Usage: cargo run --example watch_events -- [host] [port]

use crossfire_client::{ClientConfig, Event, VirtualMachine};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("crossfire_client=info,crossfire::console=debug")
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(5000);

    let vm = VirtualMachine::attach(&ClientConfig::new(&host, port)).await?;

    let requests = vm.event_request_manager();
    requests.create_script_load_request();
    requests.create_thread_enter_request();
    requests.create_thread_exit_request();
    requests.create_breakpoint_request();
    requests.create_vm_death_request();

    let queue = vm.event_queue();
    while vm.is_connected() {
        let Some(set) = queue.remove(Some(Duration::from_secs(5))).await? else {
            continue;
        };

        for event in set.events() {
            match event {
                Event::ScriptLoad { script, .. } => {
                    println!("script loaded: {}", script.url.as_deref().unwrap_or(&script.id))
                }
                Event::ThreadEnter { thread, .. } => println!("context created: {}", thread.id()),
                Event::ThreadExit { thread, .. } => println!("context destroyed: {}", thread.id()),
                Event::Breakpoint { thread, location, .. } => {
                    println!("break in {} at {:?}", thread.id(), location.as_ref().map(|l| l.to_string()));
                    vm.resume_thread(thread).await;
                }
                Event::VmDeath { .. } => println!("remote closed"),
            }
        }
    }

    Ok(())
}
