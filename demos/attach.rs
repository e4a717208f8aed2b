// Attach to a Crossfire server and print what it reports
//
// Usage: cargo run --example attach -- [host] [port]

use crossfire_client::{ClientConfig, VirtualMachine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("crossfire_client=debug")
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(5000);

    println!("Connecting to Crossfire at {}:{}...", host, port);

    let vm = VirtualMachine::attach(&ClientConfig::new(&host, port)).await?;

    println!("✓ Successfully connected and completed handshake!");
    println!("Version: {}", vm.version().await);

    for thread in vm.all_threads().await {
        println!("Context {} {}", thread.id(), thread.href().unwrap_or("-"));
    }
    for script in vm.all_scripts().await {
        println!("Script {}", script.url.as_deref().unwrap_or(&script.id));
    }

    vm.dispose();
    Ok(())
}
