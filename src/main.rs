use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use d_cache::CacheConfig;
use d_cache::CacheController;
use d_cache::CacheStatsTable;
use d_cache::ConcurrencyControl;
use d_cache::DataOwner;
use d_cache::GenericManager;
use d_cache::KeyGenerator;
use d_cache::KeyOptions;
use d_cache::LruInMemoryStorage;
use d_cache::MemoryStream;
use d_cache::OperationError;
use d_cache::Result;
use d_cache::StreamCacheController;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Customer {
    id: u64,
    name: String,
}

#[derive(Serialize)]
struct CustomerParams {
    id: u64,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();

    let mut settings = CacheConfig::new()?;
    settings.manager.concurrency = ConcurrencyControl::Distributed;
    let settings = settings.validate()?;

    // Both instances share one in-process broker
    let broker = MemoryStream::new();
    let executions = Arc::new(AtomicUsize::new(0));

    let mut managers = Vec::new();
    for name in ["instance-a", "instance-b"] {
        let storage = Arc::new(LruInMemoryStorage::default());
        let stats = Arc::new(CacheStatsTable::from_config(&settings.stats));
        let controller = StreamCacheController::builder(Arc::new(broker.connection()), Arc::new(broker.connection()))
            .storage(storage.clone())
            .stats(stats.clone())
            .instance_id(name)
            .config(settings.controller.clone())
            .start()
            .await?;
        let controller: Arc<dyn CacheController> = controller;
        managers.push(GenericManager::new(
            controller,
            storage,
            stats,
            settings.manager.clone(),
        ));
    }

    let make_key = KeyGenerator::key_factory::<CustomerParams>(
        KeyOptions::new("getCustomer")
            .service("demo")
            .data_owner(DataOwner::PublicData),
    );
    let key = make_key(&CustomerParams { id: 42 })?;

    let operations: Vec<_> = managers
        .iter()
        .map(|manager| {
            let executions = executions.clone();
            manager.wrap("getCustomer", Duration::from_secs(60), move |id: u64| {
                let executions = executions.clone();
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok::<_, OperationError>(Customer {
                        id,
                        name: format!("customer-{id}"),
                    })
                }
            })
        })
        .collect();

    let (a, b) = tokio::join!(operations[0].call(&key, 42), operations[1].call(&key, 42));
    let (a, b) = (a?, b?);
    info!(?a, ?b, executions = executions.load(Ordering::SeqCst), "both instances answered");

    for (manager, name) in managers.iter().zip(["instance-a", "instance-b"]) {
        let report = manager.stats().operation_stats_string("getCustomer", None);
        println!("{name}:\n{report}");
    }

    for manager in &managers {
        manager.close().await?;
    }
    println!("Exiting program.");
    Ok(())
}

fn init_observability() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,d_cache=debug")))
        .init();
}
