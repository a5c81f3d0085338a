//! Versioned schema migrations.

pub(crate) const MIGRATION_V1_SQL: &str = r"
CREATE TABLE users (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT NOT NULL,
    hosted_id           INTEGER UNIQUE NULL,
    deploy_key_id       INTEGER UNIQUE NULL,
    is_rsa_pair_set     INTEGER NOT NULL DEFAULT 0,
    created             TEXT NOT NULL,
    updated             TEXT NOT NULL
);

CREATE TABLE mirror_groups (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    hosted_id           INTEGER UNIQUE NOT NULL,
    name                TEXT NOT NULL,
    created             TEXT NOT NULL,
    updated             TEXT NOT NULL
);

CREATE TABLE projects (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    hosted_id           INTEGER UNIQUE NOT NULL,
    name                TEXT NOT NULL,
    name_with_namespace TEXT NOT NULL,
    web_url             TEXT NULL,
    created             TEXT NOT NULL,
    updated             TEXT NOT NULL
);

CREATE TABLE interval_schedule (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    every               INTEGER NOT NULL CHECK (every > 0),
    period              TEXT NOT NULL
        CHECK (period IN ('days', 'hours', 'minutes', 'seconds', 'microseconds')),
    UNIQUE (every, period)
);

CREATE TABLE crontab_schedule (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    minute              TEXT NOT NULL DEFAULT '*',
    hour                TEXT NOT NULL DEFAULT '*',
    day_of_week         TEXT NOT NULL DEFAULT '*',
    day_of_month        TEXT NOT NULL DEFAULT '*',
    month_of_year       TEXT NOT NULL DEFAULT '*',
    UNIQUE (minute, hour, day_of_week, day_of_month, month_of_year)
);

CREATE TABLE periodic_task (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT NOT NULL UNIQUE,
    task                TEXT NOT NULL,
    interval_id         INTEGER NULL REFERENCES interval_schedule (id),
    crontab_id          INTEGER NULL REFERENCES crontab_schedule (id),
    args                TEXT NOT NULL DEFAULT '[]',
    kwargs              TEXT NOT NULL DEFAULT '{}',
    queue               TEXT NULL,
    exchange            TEXT NULL,
    routing_key         TEXT NULL,
    headers             TEXT NOT NULL DEFAULT '{}',
    priority            INTEGER NULL,
    expires             TEXT NULL,
    expire_seconds      INTEGER NULL,
    one_off             INTEGER NOT NULL DEFAULT 0,
    start_time          TEXT NULL,
    enabled             INTEGER NOT NULL DEFAULT 1,
    last_run_at         TEXT NULL,
    total_run_count     INTEGER NOT NULL DEFAULT 0,
    description         TEXT NOT NULL DEFAULT '',
    CHECK ((interval_id IS NULL) <> (crontab_id IS NULL))
);

CREATE INDEX periodic_task_crontab_idx ON periodic_task (crontab_id);
CREATE INDEX periodic_task_interval_idx ON periodic_task (interval_id);

CREATE TABLE periodic_tasks (
    ident               INTEGER PRIMARY KEY,
    last_update         TEXT NOT NULL
);

CREATE TABLE pull_mirrors (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id                     INTEGER NOT NULL REFERENCES users (id),
    project_id                  INTEGER NULL REFERENCES projects (id),
    group_id                    INTEGER NULL REFERENCES mirror_groups (id),
    periodic_task_id            INTEGER NULL REFERENCES periodic_task (id) ON DELETE SET NULL,
    source                      TEXT NULL,
    target                      TEXT NULL,
    foreign_vcs_type            TEXT NULL,
    last_sync                   TEXT NULL,
    note                        TEXT NOT NULL DEFAULT '',
    hook_token                  TEXT NOT NULL,
    is_force_update             INTEGER NOT NULL DEFAULT 0,
    is_prune_mirrors            INTEGER NOT NULL DEFAULT 0,
    is_deleted                  INTEGER NOT NULL DEFAULT 0,
    project_name                TEXT NOT NULL DEFAULT '',
    project_mirror              TEXT NULL,
    is_no_create                INTEGER NOT NULL DEFAULT 0,
    is_force_create             INTEGER NOT NULL DEFAULT 0,
    is_no_remote                INTEGER NOT NULL DEFAULT 0,
    is_issues_enabled           INTEGER NOT NULL DEFAULT 0,
    is_wall_enabled             INTEGER NOT NULL DEFAULT 0,
    is_wiki_enabled             INTEGER NOT NULL DEFAULT 0,
    is_snippets_enabled         INTEGER NOT NULL DEFAULT 0,
    is_merge_requests_enabled   INTEGER NOT NULL DEFAULT 0,
    visibility                  TEXT NOT NULL DEFAULT 'private',
    created                     TEXT NOT NULL,
    updated                     TEXT NOT NULL
);

CREATE INDEX pull_mirrors_user_idx ON pull_mirrors (user_id);

CREATE TABLE push_mirrors (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id             INTEGER NOT NULL REFERENCES users (id),
    project_id          INTEGER NULL REFERENCES projects (id),
    periodic_task_id    INTEGER NULL REFERENCES periodic_task (id) ON DELETE SET NULL,
    source              TEXT NULL,
    target              TEXT NULL,
    foreign_vcs_type    TEXT NULL,
    last_sync           TEXT NULL,
    note                TEXT NOT NULL DEFAULT '',
    hook_token          TEXT NOT NULL,
    is_force_update     INTEGER NOT NULL DEFAULT 0,
    is_prune_mirrors    INTEGER NOT NULL DEFAULT 0,
    is_deleted          INTEGER NOT NULL DEFAULT 0,
    created             TEXT NOT NULL,
    updated             TEXT NOT NULL
);

CREATE INDEX push_mirrors_user_idx ON push_mirrors (user_id);

CREATE TABLE task_meta (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id             TEXT NOT NULL UNIQUE,
    name                TEXT NOT NULL,
    args                TEXT NOT NULL DEFAULT '[]',
    kwargs              TEXT NOT NULL DEFAULT '{}',
    options             TEXT NOT NULL DEFAULT '{}',
    queue               TEXT NOT NULL,
    priority            INTEGER NOT NULL DEFAULT 0,
    status              TEXT NOT NULL DEFAULT 'PENDING',
    result              TEXT NULL,
    traceback           TEXT NULL,
    error_code          TEXT NULL,
    parent_id           TEXT NULL,
    chain_next          TEXT NOT NULL DEFAULT '[]',
    created_at          TEXT NOT NULL,
    eta                 TEXT NULL,
    expires             TEXT NULL,
    claimed_at          TEXT NULL,
    attempts            INTEGER NOT NULL DEFAULT 0,
    date_done           TEXT NULL
);

CREATE INDEX task_meta_pending_idx ON task_meta (status, queue, priority, id);

CREATE TABLE task_runs (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    pull_mirror_id      INTEGER NULL REFERENCES pull_mirrors (id) ON DELETE CASCADE,
    push_mirror_id      INTEGER NULL REFERENCES push_mirrors (id) ON DELETE CASCADE,
    task_name           TEXT NOT NULL,
    invoked_by          TEXT NOT NULL,
    task_id             TEXT NOT NULL,
    parent_id           INTEGER NULL REFERENCES task_runs (id) ON DELETE SET NULL,
    created             TEXT NOT NULL,
    CHECK (pull_mirror_id IS NULL OR push_mirror_id IS NULL)
);

CREATE INDEX task_runs_pull_idx ON task_runs (pull_mirror_id);
CREATE INDEX task_runs_push_idx ON task_runs (push_mirror_id);

CREATE TABLE task_locks (
    key                 TEXT PRIMARY KEY,
    task_name           TEXT NOT NULL,
    holder              TEXT NOT NULL,
    acquired_at         TEXT NOT NULL,
    expires_at          TEXT NOT NULL
);

CREATE INDEX task_locks_expires_idx ON task_locks (expires_at);
";

pub(crate) const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

/// Tables created by the migrations, for schema checks.
pub const TABLES: &[&str] = &[
    "schema_migrations",
    "users",
    "mirror_groups",
    "projects",
    "interval_schedule",
    "crontab_schedule",
    "periodic_task",
    "periodic_tasks",
    "pull_mirrors",
    "push_mirrors",
    "task_meta",
    "task_runs",
    "task_locks",
];
