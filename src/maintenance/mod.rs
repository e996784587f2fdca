use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection, Row};
use tracing::info;

use crate::errors::Result;
use crate::secrets::Credentials;

const LIST_PUBLIC_TABLES: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = 'public' ORDER BY table_name";

/// Returns true iff a database with exactly the given name exists on the
/// target endpoint.
pub async fn database_exists(
    endpoint: &str,
    credentials: &Credentials,
    database: &str,
) -> Result<bool> {
    info!(
        "Checking if database {} exists on {} port {}",
        database, endpoint, credentials.port
    );
    let mut conn = connect(endpoint, credentials, None).await?;

    let rows = sqlx::query("SELECT datname FROM pg_database")
        .fetch_all(&mut conn)
        .await?;
    let names = rows
        .iter()
        .map(|row| row.try_get("datname"))
        .collect::<std::result::Result<Vec<String>, _>>()?;

    let _ = conn.close().await;
    Ok(database_listed(&names, database))
}

pub fn database_listed(names: &[String], target: &str) -> bool {
    names.iter().any(|name| name == target)
}

/// Drops every table in the public schema with CASCADE. Destructive and
/// irreversible; the restore flow only calls this after the existence
/// check confirmed the database is present.
pub async fn drop_public_tables(
    endpoint: &str,
    credentials: &Credentials,
    database: &str,
) -> Result<usize> {
    info!(
        "Dropping tables on database {} on {} port {}",
        database, endpoint, credentials.port
    );
    let mut conn = connect(endpoint, credentials, Some(database)).await?;

    let tables = list_public_tables(&mut conn).await?;
    for table in &tables {
        info!("Dropping table: {}", table);
        sqlx::query(&format!("DROP TABLE {} CASCADE", quote_ident(table)))
            .execute(&mut conn)
            .await?;
    }

    let _ = conn.close().await;
    Ok(tables.len())
}

/// Post-restore maintenance pass, one table at a time. Autocommit applies
/// per statement; VACUUM cannot run inside a transaction block anyway.
pub async fn vacuum_analyze_tables(
    endpoint: &str,
    credentials: &Credentials,
    database: &str,
) -> Result<usize> {
    info!(
        "Vacuum and analyze for tables on database {} on {} port {}",
        database, endpoint, credentials.port
    );
    let mut conn = connect(endpoint, credentials, Some(database)).await?;

    let tables = list_public_tables(&mut conn).await?;
    for table in &tables {
        info!("Vacuum and analyze table: {}", table);
        sqlx::query(&format!(
            "VACUUM (FULL, ANALYZE, VERBOSE) {}",
            quote_ident(table)
        ))
        .execute(&mut conn)
        .await?;
    }

    let _ = conn.close().await;
    Ok(tables.len())
}

/// One listing shared by drop and vacuum.
async fn list_public_tables(conn: &mut PgConnection) -> Result<Vec<String>> {
    let rows = sqlx::query(LIST_PUBLIC_TABLES).fetch_all(conn).await?;
    let tables = rows
        .iter()
        .map(|row| row.try_get("table_name"))
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(tables)
}

/// Every operation opens and closes its own connection; credentials go
/// through the options builder so passwords never need URL escaping.
async fn connect(
    endpoint: &str,
    credentials: &Credentials,
    database: Option<&str>,
) -> Result<PgConnection> {
    let mut options = PgConnectOptions::new()
        .host(endpoint)
        .port(credentials.port)
        .username(&credentials.username)
        .password(&credentials.password);
    if let Some(database) = database {
        options = options.database(database);
    }
    let conn = PgConnection::connect_with(&options).await?;
    Ok(conn)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
