use async_trait::async_trait;
use serde_json::Value;

use aria_contract::entity::{Assistant, Message, Run, RunStatus, RunStep, Thread};
use aria_contract::now_millis;
use aria_contract::storage::{
    AssistantPatch, AssistantStore, ListPage, ListQuery, MessagePatch, MessageStore, RunPatch,
    RunStepPatch, RunStepStore, RunStore, SortOrder, StoreError, ThreadPatch, ThreadStore,
};

/// PostgreSQL-backed entity store.
///
/// Each entity lives in its own table as a JSONB `data` column plus the key
/// columns needed for lookup and a `BIGSERIAL seq` for stable ordering
/// consistent with insertion (and therefore `created_at`). Thread children
/// are removed by `ON DELETE CASCADE`. Status-guarded run updates and the
/// read-modify-write of patches run inside `SELECT ... FOR UPDATE`
/// transactions.
pub struct PostgresStore {
    pool: sqlx::PgPool,
}

impl PostgresStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Create the storage tables if they do not exist (idempotent).
    pub async fn ensure_tables(&self) -> Result<(), StoreError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS assistants (
                id   TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                seq  BIGSERIAL
            );
            CREATE TABLE IF NOT EXISTS threads (
                id   TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                seq  BIGSERIAL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id        TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                data      JSONB NOT NULL,
                seq       BIGSERIAL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_thread_seq
                ON messages (thread_id, seq);
            CREATE TABLE IF NOT EXISTS runs (
                id        TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                status    TEXT NOT NULL,
                data      JSONB NOT NULL,
                seq       BIGSERIAL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_thread_seq
                ON runs (thread_id, seq);
            CREATE TABLE IF NOT EXISTS run_steps (
                id        TEXT PRIMARY KEY,
                run_id    TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                status    TEXT NOT NULL,
                data      JSONB NOT NULL,
                seq       BIGSERIAL
            );
            CREATE INDEX IF NOT EXISTS idx_run_steps_run_seq
                ON run_steps (run_id, seq);
        "#;
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        tracing::debug!("postgres entity tables ready");
        Ok(())
    }

    async fn fetch_data(
        &self,
        table: &str,
        scope: &str,
        binds: &[&str],
        entity: &str,
        id: &str,
    ) -> Result<Value, StoreError> {
        let sql = format!("SELECT data FROM {table} WHERE {scope}");
        let mut q = sqlx::query_as::<_, (Value,)>(&sql);
        for bind in binds {
            q = q.bind(*bind);
        }
        let row = q.fetch_optional(&self.pool).await.map_err(sql_err)?;
        row.map(|(data,)| data)
            .ok_or_else(|| not_found(entity, id))
    }

    async fn list_scoped<T>(
        &self,
        table: &str,
        scope: &str,
        scope_binds: &[&str],
        query: &ListQuery,
        id_of: impl Fn(&T) -> &str,
    ) -> Result<ListPage<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        if !self.cursor_exists(table, query.after.as_ref()).await?
            || !self.cursor_exists(table, query.before.as_ref()).await?
        {
            return Ok(ListPage::empty());
        }

        let limit = query.effective_limit();
        let sql = list_sql(table, scope, scope_binds.len() + 1, query.order);
        let mut q = sqlx::query_as::<_, (Value,)>(&sql);
        for bind in scope_binds {
            q = q.bind(*bind);
        }
        let rows: Vec<(Value,)> = q
            .bind(query.after.as_deref())
            .bind(query.before.as_deref())
            // Look-ahead row feeds has_more only.
            .bind((limit + 1) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;

        let mut decoded = Vec::with_capacity(rows.len());
        for (data,) in rows {
            decoded.push(decode::<T>(data)?);
        }
        let has_more = decoded.len() > limit;
        decoded.truncate(limit);
        Ok(ListPage {
            first_id: decoded.first().map(|r| id_of(r).to_string()),
            last_id: decoded.last().map(|r| id_of(r).to_string()),
            data: decoded,
            has_more,
        })
    }

    /// An `after`/`before` id that matches no row yields an empty page.
    async fn cursor_exists(
        &self,
        table: &str,
        cursor: Option<&String>,
    ) -> Result<bool, StoreError> {
        let Some(id) = cursor else {
            return Ok(true);
        };
        let sql = format!("SELECT 1 FROM {table} WHERE id = $1");
        let found: Option<(i32,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(found.is_some())
    }
}

fn sql_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn not_found(entity: &str, id: &str) -> StoreError {
    StoreError::NotFound(format!("{entity} {id}"))
}

fn insert_err(e: sqlx::Error, entity: &str, id: &str) -> StoreError {
    let text = e.to_string();
    if text.contains("duplicate key") || text.contains("unique constraint") {
        StoreError::Conflict(format!("{entity} {id} already exists"))
    } else if text.contains("foreign key") {
        StoreError::NotFound(format!("parent of {entity} {id}"))
    } else {
        sql_err(e)
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, StoreError> {
    serde_json::from_value(data).map_err(|e| StoreError::Backend(e.to_string()))
}

fn encode<T: serde::Serialize>(entity: &T) -> Result<Value, StoreError> {
    serde_json::to_value(entity).map_err(|e| StoreError::Backend(e.to_string()))
}

fn run_status_text(status: RunStatus) -> String {
    serde_json::to_string(&status)
        .map(|s| s.trim_matches('"').to_string())
        .unwrap_or_default()
}

/// Windowed list query for one table. `scope` is the filter fragment using
/// binds `$1..`; `n` is the first free bind index after the scope binds.
fn list_sql(table: &str, scope: &str, n: usize, order: SortOrder) -> String {
    let (cmp_after, cmp_before, dir) = match order {
        SortOrder::Asc => (">", "<", "ASC"),
        SortOrder::Desc => ("<", ">", "DESC"),
    };
    format!(
        "SELECT data FROM {table} WHERE {scope} \
         AND (${n}::text IS NULL OR seq {cmp_after} (SELECT seq FROM {table} WHERE id = ${n})) \
         AND (${before}::text IS NULL OR seq {cmp_before} (SELECT seq FROM {table} WHERE id = ${before})) \
         ORDER BY seq {dir} LIMIT ${limit}",
        before = n + 1,
        limit = n + 2,
    )
}

#[async_trait]
impl AssistantStore for PostgresStore {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant, StoreError> {
        let data = encode(&assistant)?;
        sqlx::query("INSERT INTO assistants (id, data) VALUES ($1, $2)")
            .bind(&assistant.id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_err(e, "assistant", &assistant.id))?;
        Ok(assistant)
    }

    async fn get_assistant(&self, id: &str) -> Result<Assistant, StoreError> {
        let data = self
            .fetch_data("assistants", "id = $1", &[id], "assistant", id)
            .await?;
        decode(data)
    }

    async fn update_assistant(
        &self,
        id: &str,
        patch: AssistantPatch,
    ) -> Result<Assistant, StoreError> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM assistants WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(sql_err)?;
        let Some((data,)) = row else {
            return Err(not_found("assistant", id));
        };
        let mut assistant: Assistant = decode(data)?;
        patch.apply(&mut assistant, now_millis());
        sqlx::query("UPDATE assistants SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(encode(&assistant)?)
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        Ok(assistant)
    }

    async fn delete_assistant(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM assistants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        if result.rows_affected() == 0 {
            return Err(not_found("assistant", id));
        }
        Ok(())
    }

    async fn list_assistants(&self, query: &ListQuery) -> Result<ListPage<Assistant>, StoreError> {
        self.list_scoped("assistants", "TRUE", &[], query, |a: &Assistant| &a.id)
            .await
    }
}

#[async_trait]
impl ThreadStore for PostgresStore {
    async fn create_thread(&self, thread: Thread) -> Result<Thread, StoreError> {
        let data = encode(&thread)?;
        sqlx::query("INSERT INTO threads (id, data) VALUES ($1, $2)")
            .bind(&thread.id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_err(e, "thread", &thread.id))?;
        Ok(thread)
    }

    async fn get_thread(&self, id: &str) -> Result<Thread, StoreError> {
        let data = self
            .fetch_data("threads", "id = $1", &[id], "thread", id)
            .await?;
        decode(data)
    }

    async fn update_thread(&self, id: &str, patch: ThreadPatch) -> Result<Thread, StoreError> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM threads WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(sql_err)?;
        let Some((data,)) = row else {
            return Err(not_found("thread", id));
        };
        let mut thread: Thread = decode(data)?;
        patch.apply(&mut thread, now_millis());
        sqlx::query("UPDATE threads SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(encode(&thread)?)
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        Ok(thread)
    }

    async fn delete_thread(&self, id: &str) -> Result<(), StoreError> {
        // Children go with the thread via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM threads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        if result.rows_affected() == 0 {
            return Err(not_found("thread", id));
        }
        Ok(())
    }

    async fn list_threads(&self, query: &ListQuery) -> Result<ListPage<Thread>, StoreError> {
        self.list_scoped("threads", "TRUE", &[], query, |t: &Thread| &t.id)
            .await
    }
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn create_message(&self, message: Message) -> Result<Message, StoreError> {
        let data = encode(&message)?;
        sqlx::query("INSERT INTO messages (id, thread_id, data) VALUES ($1, $2, $3)")
            .bind(&message.id)
            .bind(&message.thread_id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_err(e, "message", &message.id))?;
        Ok(message)
    }

    async fn get_message(&self, thread_id: &str, id: &str) -> Result<Message, StoreError> {
        let data = self
            .fetch_data(
                "messages",
                "thread_id = $1 AND id = $2",
                &[thread_id, id],
                "message",
                id,
            )
            .await?;
        decode(data)
    }

    async fn update_message(
        &self,
        thread_id: &str,
        id: &str,
        patch: MessagePatch,
    ) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT data FROM messages WHERE thread_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(thread_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(sql_err)?;
        let Some((data,)) = row else {
            return Err(not_found("message", id));
        };
        let mut message: Message = decode(data)?;
        patch.apply(&mut message, now_millis());
        sqlx::query("UPDATE messages SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(encode(&message)?)
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        Ok(message)
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<Message>, StoreError> {
        self.list_scoped(
            "messages",
            "thread_id = $1",
            &[thread_id],
            query,
            |m: &Message| &m.id,
        )
        .await
    }
}

#[async_trait]
impl RunStore for PostgresStore {
    async fn create_run(&self, run: Run) -> Result<Run, StoreError> {
        let data = encode(&run)?;
        sqlx::query("INSERT INTO runs (id, thread_id, status, data) VALUES ($1, $2, $3, $4)")
            .bind(&run.id)
            .bind(&run.thread_id)
            .bind(run_status_text(run.status))
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_err(e, "run", &run.id))?;
        Ok(run)
    }

    async fn get_run(&self, thread_id: &str, id: &str) -> Result<Run, StoreError> {
        let data = self
            .fetch_data(
                "runs",
                "thread_id = $1 AND id = $2",
                &[thread_id, id],
                "run",
                id,
            )
            .await?;
        decode(data)
    }

    async fn update_run(
        &self,
        thread_id: &str,
        id: &str,
        patch: RunPatch,
    ) -> Result<Run, StoreError> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM runs WHERE thread_id = $1 AND id = $2 FOR UPDATE")
                .bind(thread_id)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(sql_err)?;
        let Some((data,)) = row else {
            return Err(not_found("run", id));
        };
        let mut run: Run = decode(data)?;
        if run.status.is_terminal() && !patch.is_metadata_only() {
            return Err(StoreError::InvalidArgument(format!(
                "run {id} is terminal; only metadata may change"
            )));
        }
        patch.apply(&mut run, now_millis());
        sqlx::query("UPDATE runs SET data = $2, status = $3 WHERE id = $1")
            .bind(id)
            .bind(encode(&run)?)
            .bind(run_status_text(run.status))
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        Ok(run)
    }

    async fn update_run_status_guarded(
        &self,
        thread_id: &str,
        id: &str,
        expected: &[RunStatus],
        patch: RunPatch,
    ) -> Result<Option<Run>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        // Locked read-modify-write keeps check and update atomic.
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM runs WHERE thread_id = $1 AND id = $2 FOR UPDATE")
                .bind(thread_id)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(sql_err)?;
        let Some((data,)) = row else {
            return Err(not_found("run", id));
        };
        let mut run: Run = decode(data)?;
        if !expected.contains(&run.status) {
            return Ok(None);
        }
        patch.apply(&mut run, now_millis());
        sqlx::query("UPDATE runs SET data = $2, status = $3 WHERE id = $1")
            .bind(id)
            .bind(encode(&run)?)
            .bind(run_status_text(run.status))
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        Ok(Some(run))
    }

    async fn list_runs(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<Run>, StoreError> {
        self.list_scoped("runs", "thread_id = $1", &[thread_id], query, |r: &Run| {
            &r.id
        })
        .await
    }
}

#[async_trait]
impl RunStepStore for PostgresStore {
    async fn create_run_step(&self, step: RunStep) -> Result<RunStep, StoreError> {
        let data = encode(&step)?;
        sqlx::query(
            "INSERT INTO run_steps (id, run_id, thread_id, status, data) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&step.id)
        .bind(&step.run_id)
        .bind(&step.thread_id)
        .bind(step_status_text(&step))
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "run step", &step.id))?;
        Ok(step)
    }

    async fn get_run_step(
        &self,
        thread_id: &str,
        run_id: &str,
        id: &str,
    ) -> Result<RunStep, StoreError> {
        let data = self
            .fetch_data(
                "run_steps",
                "thread_id = $1 AND run_id = $2 AND id = $3",
                &[thread_id, run_id, id],
                "run step",
                id,
            )
            .await?;
        decode(data)
    }

    async fn update_run_step(
        &self,
        thread_id: &str,
        run_id: &str,
        id: &str,
        patch: RunStepPatch,
    ) -> Result<RunStep, StoreError> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT data FROM run_steps \
             WHERE thread_id = $1 AND run_id = $2 AND id = $3 FOR UPDATE",
        )
        .bind(thread_id)
        .bind(run_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(sql_err)?;
        let Some((data,)) = row else {
            return Err(not_found("run step", id));
        };
        let mut step: RunStep = decode(data)?;
        patch.apply(&mut step, now_millis());
        sqlx::query("UPDATE run_steps SET data = $2, status = $3 WHERE id = $1")
            .bind(id)
            .bind(encode(&step)?)
            .bind(step_status_text(&step))
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        Ok(step)
    }

    async fn list_run_steps(
        &self,
        thread_id: &str,
        run_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<RunStep>, StoreError> {
        self.list_scoped(
            "run_steps",
            "thread_id = $1 AND run_id = $2",
            &[thread_id, run_id],
            query,
            |s: &RunStep| &s.id,
        )
        .await
    }
}

fn step_status_text(step: &RunStep) -> String {
    serde_json::to_string(&step.status)
        .map(|s| s.trim_matches('"').to_string())
        .unwrap_or_default()
}
