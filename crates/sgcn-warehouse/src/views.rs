//! Reporting views over the `cache` table.

use ::duckdb::Connection;

/// Create the reporting views.
///
/// - `vw_final_results`: one row per committed enrichment, keyed by species key
/// - `vw_final_records`: one row per committed enriched record, keyed by row id
/// - `vw_cache_namespaces`: entry counts grouped by key namespace (`final_res`,
///   `itis`, `worms`, ...)
///
/// # Errors
/// Returns an error if the view creation SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_final_results AS
SELECT
    substr(key, length('final_res:') + 1) AS sppin_key,
    value,
    stored_at
FROM cache
WHERE key LIKE 'final_res:%';

CREATE OR REPLACE VIEW vw_final_records AS
SELECT
    substr(key, length('record:') + 1) AS row_id,
    value,
    stored_at
FROM cache
WHERE key LIKE 'record:%';

CREATE OR REPLACE VIEW vw_cache_namespaces AS
SELECT
    split_part(key, ':', 1) AS namespace,
    COUNT(*) AS entries,
    MAX(stored_at) AS last_stored_at
FROM cache
GROUP BY split_part(key, ':', 1);
",
    )?;

    Ok(())
}
