// Set a breakpoint, wait for it to hit, then dump the stack
//
// Usage: cargo run --example inspect_stack -- <url> <line> [host] [port]

use anyhow::{bail, Context};
use crossfire_client::{ClientConfig, Event, VirtualMachine};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("crossfire_client=info")
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().context("missing script url")?;
    let line: u64 = args.next().context("missing line")?.parse()?;
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(5000);

    let vm = VirtualMachine::attach(&ClientConfig::new(&host, port)).await?;
    vm.event_request_manager().create_breakpoint_request();

    let Some(breakpoint) = vm.set_breakpoint(&url, line, None, true, None).await else {
        bail!("could not set breakpoint at {}:{}", url, line);
    };
    println!("Breakpoint {} set at {}", breakpoint.handle, breakpoint.location);

    let queue = vm.event_queue();
    let thread = loop {
        let Some(set) = queue.remove(Some(Duration::from_secs(30))).await? else {
            bail!("breakpoint not hit");
        };
        if let Some(Event::Breakpoint { thread, .. }) = set.events().first() {
            break thread.clone();
        }
    };

    for frame in vm.frames(&thread).await {
        println!(
            "#{} {} line {}",
            frame.index(),
            frame.function_name().unwrap_or("(anonymous)"),
            frame.line()
        );
        for variable in frame.variables() {
            println!("    {} = {}", variable.name, frame.resolve(variable).await);
        }
    }

    vm.resume_thread(&thread).await;
    vm.clear_breakpoint(breakpoint.handle).await;
    vm.dispose();
    Ok(())
}
