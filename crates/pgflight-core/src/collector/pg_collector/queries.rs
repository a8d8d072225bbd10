//! SQL query builders for PostgreSQL statistics views.

/// Sessions grouped by wait event, excluding idle sessions and the recorder itself.
pub(super) fn build_wait_events_query() -> &'static str {
    r#"
        SELECT
            COALESCE(backend_type, '') as backend_type,
            wait_event_type,
            wait_event,
            count(*)::bigint as waiters
        FROM pg_stat_activity
        WHERE wait_event IS NOT NULL
          AND wait_event_type <> 'Activity'
          AND state IS DISTINCT FROM 'idle'
          AND pid <> pg_backend_pid()
        GROUP BY 1, 2, 3
        ORDER BY waiters DESC
    "#
}

/// Builds version-aware query for non-idle client sessions.
///
/// `$1` is the row limit.
pub(super) fn build_sessions_query(server_version_num: Option<i32>) -> String {
    let query_id_expr = if server_version_num.unwrap_or(0) >= 140000 {
        "COALESCE(query_id, 0)::bigint as query_id"
    } else {
        "0::bigint as query_id"
    };

    format!(
        r#"
            SELECT
                pid,
                COALESCE(datname, '') as datname,
                COALESCE(usename, '') as usename,
                COALESCE(application_name, '') as application_name,
                COALESCE(backend_type, '') as backend_type,
                COALESCE(state, '') as state,
                COALESCE(wait_event_type, '') as wait_event_type,
                COALESCE(wait_event, '') as wait_event,
                {query_id_expr},
                COALESCE(query, '') as query,
                COALESCE(EXTRACT(EPOCH FROM query_start)::bigint, 0) as query_start,
                COALESCE(EXTRACT(EPOCH FROM xact_start)::bigint, 0) as xact_start,
                COALESCE(EXTRACT(EPOCH FROM now() - query_start)::bigint, 0) as query_age
            FROM pg_stat_activity
            WHERE state IS DISTINCT FROM 'idle'
              AND backend_type = 'client backend'
              AND pid <> pg_backend_pid()
            ORDER BY query_start ASC NULLS LAST
            LIMIT $1
        "#
    )
}

/// Cheap cardinality check used by the lock storm guard.
pub(super) fn build_blocked_count_query() -> &'static str {
    r#"
        SELECT count(*)::bigint
        FROM pg_stat_activity
        WHERE wait_event_type = 'Lock'
    "#
}

/// Lock capture pass 1: blocked sessions and their blocker pids.
///
/// Only sessions waiting on a heavyweight lock are examined; the ungranted
/// lock is resolved per session with a lateral lookup rather than joining
/// every lock against every other lock.
pub(super) fn build_blocked_sessions_query(server_version_num: Option<i32>) -> String {
    let query_id_expr = if server_version_num.unwrap_or(0) >= 140000 {
        "COALESCE(a.query_id, 0)::bigint"
    } else {
        "0::bigint"
    };

    format!(
        r#"
            SELECT
                a.pid,
                COALESCE(a.usename, '') as usename,
                {query_id_expr} as query_id,
                COALESCE(a.query, '') as query,
                COALESCE(EXTRACT(EPOCH FROM now() - a.state_change)::bigint, 0) as wait_seconds,
                COALESCE(l.locktype, '') as lock_type,
                COALESCE(l.mode, '') as lock_mode,
                COALESCE(n.nspname || '.' || c.relname, l.relation::text, '') as lock_target,
                pg_blocking_pids(a.pid) as blocked_by
            FROM pg_stat_activity a
            LEFT JOIN LATERAL (
                SELECT locktype, mode, relation
                FROM pg_locks
                WHERE pid = a.pid AND NOT granted
                LIMIT 1
            ) l ON true
            LEFT JOIN pg_class c ON c.oid = l.relation
            LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE a.wait_event_type = 'Lock'
        "#
    )
}

/// Lock capture pass 2: details of the blocking sessions (`$1` = pid array).
pub(super) fn build_blocker_details_query(server_version_num: Option<i32>) -> String {
    let query_id_expr = if server_version_num.unwrap_or(0) >= 140000 {
        "COALESCE(query_id, 0)::bigint"
    } else {
        "0::bigint"
    };

    format!(
        r#"
            SELECT
                pid,
                COALESCE(usename, '') as usename,
                COALESCE(state, '') as state,
                {query_id_expr} as query_id,
                COALESCE(query, '') as query
            FROM pg_stat_activity
            WHERE pid = ANY($1)
        "#
    )
}

/// Builds version-aware query for transaction and block I/O counters.
///
/// PostgreSQL 17 moved buffer write counters from `pg_stat_bgwriter` to
/// `pg_stat_io`.
pub(super) fn build_counters_query(server_version_num: Option<i32>) -> String {
    let writes_expr = if server_version_num.unwrap_or(0) >= 170000 {
        "(SELECT COALESCE(sum(writes), 0) FROM pg_stat_io)"
    } else {
        "(SELECT buffers_checkpoint + buffers_clean + buffers_backend FROM pg_stat_bgwriter)"
    };

    format!(
        r#"
            SELECT
                COALESCE(sum(xact_commit + xact_rollback), 0)::bigint as xact_total,
                COALESCE(sum(blks_read), 0)::bigint as blks_read,
                {writes_expr}::bigint as blks_written,
                EXTRACT(EPOCH FROM now() - pg_postmaster_start_time())::double precision as uptime
            FROM pg_stat_database
        "#
    )
}

pub(super) fn build_connection_stats_query() -> &'static str {
    r#"
        SELECT
            count(*) FILTER (WHERE state = 'active')::bigint as active,
            count(*)::bigint as total,
            current_setting('max_connections')::bigint as max_connections
        FROM pg_stat_activity
        WHERE backend_type = 'client backend'
    "#
}

/// Builds version-aware query for the health gate signals.
///
/// `pg_is_in_backup()` only reports exclusive backups and was removed in
/// PostgreSQL 15; base backups are visible in `pg_stat_progress_basebackup`
/// since 13.
pub(super) fn build_health_query(server_version_num: Option<i32>) -> String {
    let v = server_version_num.unwrap_or(0);
    let backup_expr = if v >= 150000 {
        "EXISTS (SELECT 1 FROM pg_stat_progress_basebackup)"
    } else if v >= 130000 {
        "(pg_is_in_backup() OR EXISTS (SELECT 1 FROM pg_stat_progress_basebackup))"
    } else {
        "pg_is_in_backup()"
    };

    format!(
        r#"
            SELECT
                CASE WHEN pg_is_in_recovery()
                    THEN COALESCE(EXTRACT(EPOCH FROM now() - pg_last_xact_replay_timestamp()), 0)::double precision
                END as replay_lag,
                EXISTS (
                    SELECT 1 FROM pg_stat_activity
                    WHERE backend_type = 'checkpointer'
                      AND wait_event IS DISTINCT FROM 'CheckpointerMain'
                ) as checkpoint_active,
                {backup_expr} as backup_active
        "#
    )
}

/// Deallocation counter of `pg_stat_statements` (PostgreSQL 14+).
pub(super) fn build_statements_dealloc_query() -> &'static str {
    r#"
        SELECT
            i.dealloc::bigint,
            current_setting('pg_stat_statements.max')::bigint
        FROM pg_stat_statements_info i
    "#
}

/// Other recorder sessions currently executing (`$1` = application name).
pub(super) fn build_other_recorders_query() -> &'static str {
    r#"
        SELECT count(*)::bigint
        FROM pg_stat_activity
        WHERE application_name = $1
          AND state = 'active'
          AND pid <> pg_backend_pid()
    "#
}
