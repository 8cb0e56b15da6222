use anyhow::Result;

use fenceq::store::{DurableStore, RedisStore};
use fenceq_config::load_settings;

/// Ping every configured store endpoint and report quorum health.
pub(crate) async fn check_stores(config: Option<String>) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let mut reachable = 0usize;
    for (index, endpoint) in settings.store_endpoints.iter().enumerate() {
        let status = match RedisStore::connect(endpoint).await {
            Ok(store) => match store.ping().await {
                Ok(()) => {
                    reachable += 1;
                    "OK".to_string()
                }
                Err(err) => format!("FAIL ({err})"),
            },
            Err(err) => format!("FAIL ({err:#})"),
        };
        println!("Store {index}: {status}");
    }

    let total = settings.store_endpoints.len();
    let quorum = total / 2 + 1;
    if reachable >= quorum {
        println!("Store Health Check: OK ({reachable}/{total} reachable, quorum {quorum})");
    } else {
        println!("Store Health Check: FAIL ({reachable}/{total} reachable, quorum {quorum})");
    }
    Ok(())
}
