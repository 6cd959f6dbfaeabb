//! Multi-client convergence runs over the in-memory hub.

use lor_client::{
    LiveCounterRef, MemoryRealtime, MemoryTransport, ObjectValue, RealtimeObjects,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RunStats {
    pub name: &'static str,
    pub clients: usize,
    pub operations: usize,
    pub elapsed: Duration,
    pub converged: bool,
}

impl RunStats {
    pub fn print(&self) {
        println!("\n┌──────────────────────────────────────────────┐");
        println!("│ {:<44} │", self.name);
        println!("├──────────────────────────────────────────────┤");
        println!("│ clients:    {:<32} │", self.clients);
        println!("│ operations: {:<32} │", self.operations);
        println!("│ elapsed:    {:<32?} │", self.elapsed);
        println!(
            "│ converged:  {:<32} │",
            if self.converged { "yes ✓" } else { "NO ✗" }
        );
        println!("└──────────────────────────────────────────────┘");
    }
}

async fn connect_clients(
    hub: &MemoryRealtime,
    count: usize,
) -> Vec<RealtimeObjects<MemoryTransport>> {
    let mut clients = Vec::with_capacity(count);
    for _ in 0..count {
        let objects = RealtimeObjects::new(Arc::new(hub.connect()));
        hub.attach(objects.intake()).await;
        clients.push(objects);
    }
    clients
}

async fn wait_for(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

async fn counter_handle(
    objects: &RealtimeObjects<MemoryTransport>,
    object_id: &str,
) -> LiveCounterRef<MemoryTransport> {
    loop {
        if let Ok(Some(handle)) = objects.counter(object_id) {
            return handle;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Every client hammers one shared counter; the run converges when all of
/// them read the exact expected total.
pub async fn stress_counter(client_count: usize, ops_per_client: usize) -> RunStats {
    let hub = MemoryRealtime::new();
    let clients = connect_clients(&hub, client_count).await;

    let counter = clients[0]
        .create_counter(0.0)
        .await
        .expect("create counter");
    let counter_id = counter.object_id().to_string();

    let start = Instant::now();
    let mut expected = 0.0;
    let mut workers = Vec::new();
    for objects in &clients {
        let objects = objects.clone();
        let counter_id = counter_id.clone();
        // Integral amounts keep the expected total exact in f64.
        let amounts: Vec<f64> = (0..ops_per_client)
            .map(|_| (rand::random::<u8>() % 9 + 1) as f64)
            .collect();
        expected += amounts.iter().sum::<f64>();
        workers.push(tokio::spawn(async move {
            let handle = counter_handle(&objects, &counter_id).await;
            for amount in amounts {
                handle.increment(amount).await.expect("increment");
            }
        }));
    }
    for worker in workers {
        worker.await.expect("worker");
    }

    let converged = wait_for(Duration::from_secs(10), || {
        clients.iter().all(|objects| {
            objects
                .counter(&counter_id)
                .ok()
                .flatten()
                .and_then(|handle| handle.value().ok())
                == Some(expected)
        })
    })
    .await;

    RunStats {
        name: "shared counter",
        clients: client_count,
        operations: client_count * ops_per_client,
        elapsed: start.elapsed(),
        converged,
    }
}

/// Every client writes its own keys into the root map, then removes half
/// of them; the run converges when every client reads the same key set.
pub async fn stress_root_map(client_count: usize, keys_per_client: usize) -> RunStats {
    let hub = MemoryRealtime::new();
    let clients = connect_clients(&hub, client_count).await;

    let start = Instant::now();
    let mut workers = Vec::new();
    for (index, objects) in clients.iter().enumerate() {
        let objects = objects.clone();
        workers.push(tokio::spawn(async move {
            let root = objects.root();
            for key_index in 0..keys_per_client {
                let key = format!("c{}-k{}", index, key_index);
                root.set(&key, ObjectValue::Number(key_index as f64))
                    .await
                    .expect("set");
            }
            for key_index in (0..keys_per_client).step_by(2) {
                let key = format!("c{}-k{}", index, key_index);
                root.remove(&key).await.expect("remove");
            }
        }));
    }
    for worker in workers {
        worker.await.expect("worker");
    }

    let surviving_per_client = keys_per_client / 2;
    let expected = client_count * surviving_per_client;
    let converged = wait_for(Duration::from_secs(10), || {
        clients
            .iter()
            .all(|objects| objects.root().size().ok() == Some(expected))
    })
    .await;

    RunStats {
        name: "root map set/remove",
        clients: client_count,
        operations: client_count * (keys_per_client + keys_per_client.div_ceil(2)),
        elapsed: start.elapsed(),
        converged,
    }
}
