use stress::{stress_counter, stress_root_map};
pub mod stress;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

async fn async_main() {
    println!("\n╔══════════════════════════════════════════════╗");
    println!("║        LOREPLICA CONVERGENCE RUNS            ║");
    println!("╚══════════════════════════════════════════════╝");

    let stats = stress_counter(4, 50).await;
    stats.print();
    let mut all_converged = stats.converged;

    let stats = stress_root_map(4, 40).await;
    stats.print();
    all_converged &= stats.converged;

    let stats = stress_counter(10, 200).await;
    stats.print();
    all_converged &= stats.converged;

    let stats = stress_root_map(10, 100).await;
    stats.print();
    all_converged &= stats.converged;

    if all_converged {
        println!("\n✓ All runs converged");
    } else {
        println!("\n✗ Some runs failed to converge");
        std::process::exit(1);
    }
}
