use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use zeroconf_bridge::{BrowseParams, PublishParams, ZeroconfRuntime};

fn main() {
    env_logger::init();
    println!("Starting zeroconf demo...");

    let runtime = Arc::new(ZeroconfRuntime::new());
    let mut events = runtime.init();

    // 1. Publish a service on this machine
    let publisher = runtime
        .publish(PublishParams {
            port: Some(8080),
            name: Some("Demo Service".to_string()),
            service_type: Some("_http._tcp".to_string()),
            data: HashMap::from([("path".to_string(), b"/demo".to_vec())]),
            ..Default::default()
        })
        .expect("discovery backend unavailable")
        .expect("publish parameters rejected");
    println!("Publishing as handle {publisher}");

    // 2. Browse for the same type (we should see ourselves, plus anything
    //    else on the local network)
    let browser = runtime
        .browse(BrowseParams { service_type: Some("_http._tcp".to_string()) })
        .expect("discovery backend unavailable");
    println!("Browsing as handle {browser} (Ctrl-C to stop)");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .expect("failed to install Ctrl-C handler");
    }

    // 3. Print events as the host would see them
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build tokio runtime");
    rt.block_on(async {
        while running.load(Ordering::SeqCst) {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        println!("{}", serde_json::to_string_pretty(&event).unwrap());
                    }
                    None => break,
                },
                _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
            }
        }
    });

    // 4. Teardown
    println!("Shutting down...");
    runtime.unpublish_all();
    runtime.stop_browse_all();
}
