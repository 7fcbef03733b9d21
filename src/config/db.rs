use anyhow::Result;
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{info, warn};

use crate::config::Env;

pub async fn connect_db(mongo_uri: &str, database: &str) -> Result<Database> {
    let client = Client::with_uri_str(mongo_uri).await?;
    let db = client.database(database);
    db.run_command(doc! { "ping": 1 }, None).await?;
    info!(database, "MongoDB connected");
    Ok(db)
}

pub fn get_trades_collection(db: &Database, env: &Env) -> Collection<Document> {
    db.collection(&env.trades_table)
}

pub fn get_positions_collection(db: &Database, env: &Env) -> Collection<Document> {
    db.collection(&env.positions_table)
}

/// Creates the unique indexes the upsert paths depend on, and asks the
/// server to record pre-images for the positions collection so update
/// events carry the previous row.
pub async fn ensure_indexes(db: &Database, env: &Env) -> Result<()> {
    let unique = || IndexOptions::builder().unique(true).build();

    get_trades_collection(db, env)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "unique_activity_key": 1 })
                .options(unique())
                .build(),
            None,
        )
        .await?;

    get_positions_collection(db, env)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "asset": 1, "proxy_wallet": 1 })
                .options(unique())
                .build(),
            None,
        )
        .await?;

    // create_index above guarantees the collection exists for collMod.
    let pre_images = db
        .run_command(
            doc! {
                "collMod": env.positions_table.as_str(),
                "changeStreamPreAndPostImages": { "enabled": true },
            },
            None,
        )
        .await;
    if let Err(e) = pre_images {
        warn!(
            error = %e,
            collection = %env.positions_table,
            "could not enable change stream pre-images; position updates need them in push mode"
        );
    }

    info!(
        trades = %env.trades_table,
        positions = %env.positions_table,
        "indexes ready"
    );
    Ok(())
}
