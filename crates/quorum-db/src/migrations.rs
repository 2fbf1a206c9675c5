use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                reputation  INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE questions (
                id                  TEXT PRIMARY KEY,
                title               TEXT NOT NULL,
                body                TEXT NOT NULL,
                author_id           TEXT NOT NULL REFERENCES users(id),
                views               INTEGER NOT NULL DEFAULT 0,
                accepted_answer_id  TEXT,
                vote_count          INTEGER NOT NULL DEFAULT 0,
                like_count          INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_questions_created ON questions(created_at);
            CREATE INDEX idx_questions_author ON questions(author_id, created_at);

            CREATE TABLE question_tags (
                question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
                tag         TEXT NOT NULL,
                position    INTEGER NOT NULL,
                PRIMARY KEY (question_id, tag)
            );

            CREATE INDEX idx_question_tags_tag ON question_tags(tag);

            CREATE TABLE answers (
                id           TEXT PRIMARY KEY,
                question_id  TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
                author_id    TEXT NOT NULL REFERENCES users(id),
                body         TEXT NOT NULL,
                is_accepted  INTEGER NOT NULL DEFAULT 0,
                accepted_at  TEXT,
                accepted_by  TEXT,
                vote_count   INTEGER NOT NULL DEFAULT 0,
                like_count   INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                UNIQUE(question_id, author_id)
            );

            CREATE INDEX idx_answers_question ON answers(question_id, created_at);
            CREATE INDEX idx_answers_votes ON answers(question_id, vote_count);

            -- At most one accepted answer per question, enforced by the store
            CREATE UNIQUE INDEX idx_answers_one_accepted
                ON answers(question_id) WHERE is_accepted = 1;

            CREATE TABLE comments (
                id           TEXT PRIMARY KEY,
                body         TEXT NOT NULL,
                author_id    TEXT NOT NULL REFERENCES users(id),
                question_id  TEXT REFERENCES questions(id) ON DELETE CASCADE,
                answer_id    TEXT REFERENCES answers(id) ON DELETE CASCADE,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                CHECK ((question_id IS NULL) <> (answer_id IS NULL))
            );

            CREATE INDEX idx_comments_question ON comments(question_id, created_at);
            CREATE INDEX idx_comments_answer ON comments(answer_id, created_at);

            -- One row per (target, user): a user can hold at most one vote direction
            CREATE TABLE votes (
                target_kind  TEXT NOT NULL CHECK (target_kind IN ('question', 'answer')),
                target_id    TEXT NOT NULL,
                user_id      TEXT NOT NULL REFERENCES users(id),
                direction    INTEGER NOT NULL CHECK (direction IN (1, -1)),
                created_at   TEXT NOT NULL,
                PRIMARY KEY (target_kind, target_id, user_id)
            ) WITHOUT ROWID;

            CREATE TABLE likes (
                target_kind  TEXT NOT NULL CHECK (target_kind IN ('question', 'answer')),
                target_id    TEXT NOT NULL,
                user_id      TEXT NOT NULL REFERENCES users(id),
                created_at   TEXT NOT NULL,
                PRIMARY KEY (target_kind, target_id, user_id)
            ) WITHOUT ROWID;

            CREATE TABLE notifications (
                id            TEXT PRIMARY KEY,
                recipient_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind          TEXT NOT NULL,
                title         TEXT NOT NULL,
                message       TEXT NOT NULL,
                question_id   TEXT,
                answer_id     TEXT,
                comment_id    TEXT,
                actor_id      TEXT,
                is_read       INTEGER NOT NULL DEFAULT 0,
                read_at       TEXT,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_inbox
                ON notifications(recipient_id, is_read, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
