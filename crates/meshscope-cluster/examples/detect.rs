//! Example: classify the service mesh in the current kube context
//!
//! Run with: cargo run --example detect -p meshscope-cluster

use std::time::Duration;

use meshscope_cluster::{ConnectOptions, KubeCluster};
use meshscope_core::{ClusterClient, MeshClassifier, MeshLayout};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the ring crypto provider for rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cluster =
        KubeCluster::connect(ConnectOptions::default(), "meshscope", Duration::from_secs(5)).await?;
    println!("Context: {}", cluster.current_context().unwrap_or_else(|| "in-cluster".into()));
    println!("Server:  {}", cluster.check_connectivity().await?);

    let layout = MeshLayout::default();
    let mesh = MeshClassifier::new(&cluster, &layout).detect().await;
    println!("{:-<60}", "");
    println!("Mesh:    {} {}", mesh.mode().symbol(), mesh.label());
    println!("Healthy: {}", mesh.is_healthy());
    println!("Gateway: {}", mesh.has_gateway());
    println!("Detail:  {}", mesh.detail());
    Ok(())
}
