use std::path::Path;

use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};

use kube_medic::config::Config;
use kube_medic::loki::{LogBackend, LokiClient};

pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    println!("Running connectivity checks...\n");

    // 1. Configuration
    print!("  Configuration ............... ");
    let config = match Config::load(config_path) {
        Ok(c) => {
            println!("OK ({} rules)", c.rules.len());
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load configuration: {e:#}");
        }
    };

    // 2. Log backend readiness
    print!("  Log backend ................. ");
    let backend = LokiClient::new(config.log_backend.clone())?;
    if backend.ready().await {
        println!("OK ({})", config.log_backend.url);
    } else {
        println!("FAIL ({} not ready)", config.log_backend.url);
    }

    // 3. Kubeconfig
    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    // 4. Cluster connectivity
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    }

    // 5. List pods permission
    print!("  List pods permission ........ ");
    let pods: Api<Pod> = Api::all(client.clone());
    match pods.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    println!("\nAll checks completed.");
    Ok(())
}
