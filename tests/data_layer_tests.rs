mod common;

use agencydb::{CacheFacade, DataLayer};
use common::{FakeDb, config, tenant};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct InvoiceSummary {
    open: u32,
    overdue: u32,
}

#[tokio::test]
async fn layer_shares_pools_and_cache_across_clones() {
    let db = FakeDb::new();
    let cfg = config();
    let layer =
        DataLayer::with_connector(db.connector(), CacheFacade::local_only(&cfg.cache), &cfg)
            .unwrap();
    let clone = layer.clone();
    let t = tenant("agency_acme_001");

    layer
        .executor()
        .execute(&t, "UPDATE invoices SET status = 'sent'", vec![], None)
        .await
        .unwrap();
    clone
        .executor()
        .execute(&t, "UPDATE invoices SET status = 'paid'", vec![], None)
        .await
        .unwrap();
    assert_eq!(db.state().connects, 1);
    assert_eq!(clone.pools().len(), 1);

    let summary = InvoiceSummary { open: 3, overdue: 1 };
    layer
        .cache()
        .set("agency_acme_001:invoices:summary", &summary, 0)
        .await
        .unwrap();
    let cached: Option<InvoiceSummary> = clone
        .cache()
        .get("agency_acme_001:invoices:summary")
        .await
        .unwrap();
    assert_eq!(cached, Some(summary));

    clone.shutdown().await;
    assert!(layer.pools().is_empty());
    assert_eq!(db.state().closes, 1);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let db = FakeDb::new();
    let mut cfg = config();
    cfg.database.control_database = "bad name; drop".to_string();

    let result =
        DataLayer::with_connector(db.connector(), CacheFacade::local_only(&cfg.cache), &cfg);
    assert!(matches!(result, Err(agencydb::AgencyDbError::InvalidTenant(_))));
}
