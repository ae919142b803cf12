//! DDL installed at setup time: tables, composite types, SQL functions,
//! indexes, and the change-notification trigger.
//!
//! Every statement is idempotent so setup can run on each process start;
//! the backend serializes concurrent setups with an advisory lock.

/// Channel the contracts trigger notifies on.
pub const NOTIFY_CHANNEL: &str = "contracts_change";

/// The wide contracts table. The generated `versioned_slug` column backs the
/// human-readable unique reference; the six-way unique constraint is the
/// real uniqueness rule.
pub const CREATE_CONTRACTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS \"contracts\" (
    \"id\" uuid PRIMARY KEY,
    \"slug\" varchar(255) NOT NULL,
    \"type\" text NOT NULL,
    \"active\" boolean NOT NULL DEFAULT true,
    \"version_major\" integer NOT NULL DEFAULT 1,
    \"version_minor\" integer NOT NULL DEFAULT 0,
    \"version_patch\" integer NOT NULL DEFAULT 0,
    \"version_prerelease\" text NOT NULL DEFAULT '',
    \"version_build\" text NOT NULL DEFAULT '',
    \"name\" text,
    \"tags\" text[] NOT NULL DEFAULT '{}',
    \"markers\" text[] NOT NULL DEFAULT '{}',
    \"links\" jsonb NOT NULL DEFAULT '{}',
    \"requires\" jsonb[] NOT NULL DEFAULT '{}',
    \"capabilities\" jsonb[] NOT NULL DEFAULT '{}',
    \"data\" jsonb NOT NULL DEFAULT '{}',
    \"linked_at\" jsonb NOT NULL DEFAULT '{}',
    \"created_at\" timestamptz NOT NULL DEFAULT now(),
    \"updated_at\" timestamptz,
    \"versioned_slug\" text GENERATED ALWAYS AS (
        \"slug\" || '@' || \"version_major\"::text || '.' || \"version_minor\"::text || '.' ||
        \"version_patch\"::text ||
        CASE WHEN \"version_prerelease\" <> '' THEN '-' || \"version_prerelease\" ELSE '' END ||
        CASE WHEN \"version_build\" <> '' THEN '+' || \"version_build\" ELSE '' END
    ) STORED,
    CONSTRAINT \"contracts_slug_versions_key\" UNIQUE
        (\"slug\", \"version_major\", \"version_minor\", \"version_patch\",
         \"version_prerelease\", \"version_build\")
)";

/// Keep the big JSONB payloads out of TOAST compression.
pub const ALTER_CONTRACTS_STORAGE: &[&str] = &[
    "ALTER TABLE \"contracts\" ALTER COLUMN \"data\" SET STORAGE EXTERNAL",
    "ALTER TABLE \"contracts\" ALTER COLUMN \"links\" SET STORAGE EXTERNAL",
    "ALTER TABLE \"contracts\" ALTER COLUMN \"linked_at\" SET STORAGE EXTERNAL",
];

/// Directed link edges: each link contract stores two rows sharing its id,
/// one per direction, with the verb interned through `strings`.
pub const CREATE_LINKS_TABLE: &str = "CREATE TABLE IF NOT EXISTS \"links2\" (
    \"id\" uuid NOT NULL,
    \"forward\" boolean NOT NULL,
    \"fromId\" uuid NOT NULL,
    \"name\" integer NOT NULL,
    \"toId\" uuid NOT NULL,
    PRIMARY KEY (\"id\", \"forward\")
)";

pub const CREATE_STRINGS_TABLE: &str = "CREATE TABLE IF NOT EXISTS \"strings\" (
    \"id\" serial PRIMARY KEY,
    \"string\" text NOT NULL UNIQUE
)";

/// Composite types carried through the link rollup.
pub const CREATE_COMPOSITE_TYPES: &str = "DO $$ BEGIN
    CREATE TYPE link_edge AS (\"source\" uuid, \"idx\" integer, \"sink\" uuid);
    CREATE TYPE card_and_link_edges AS (\"cardId\" uuid, \"edges\" link_edge[]);
    CREATE TYPE merged_edge AS (\"source\" uuid, \"sink\" uuid, \"idxs\" integer[]);
EXCEPTION
    WHEN duplicate_object THEN NULL;
END $$";

/// `array_to_string` is only STABLE; full-text expressions need an
/// immutable wrapper.
pub const CREATE_ARRAY_TO_STRING_FN: &str =
    "CREATE OR REPLACE FUNCTION immutable_array_to_string(text[], text)
RETURNS text LANGUAGE sql IMMUTABLE AS
$$ SELECT array_to_string($1, $2) $$";

/// Deep merge of JSONB views of the same underlying contract: recurse into
/// objects, otherwise take the first non-null side.
pub const CREATE_MERGE_VIEWS_FN: &str =
    "CREATE OR REPLACE FUNCTION merge_jsonb_views(a jsonb, b jsonb)
RETURNS jsonb LANGUAGE sql IMMUTABLE AS
$$ SELECT CASE
    WHEN a IS NULL THEN b
    WHEN b IS NULL THEN a
    WHEN jsonb_typeof(a) = 'object' AND jsonb_typeof(b) = 'object' THEN (
        SELECT coalesce(jsonb_object_agg(coalesce(ea.key, eb.key),
            merge_jsonb_views(ea.value, eb.value)), '{}'::jsonb)
        FROM jsonb_each(a) AS ea
        FULL OUTER JOIN jsonb_each(b) AS eb ON ea.key = eb.key
    )
    ELSE a
END $$";

/// Change notification trigger. The payload stays small: id, slug, type and
/// operation, plus the link endpoints when a link contract changed so the
/// stream matcher can reach both sides without a read.
pub const CREATE_NOTIFY_FN: &str = "CREATE OR REPLACE FUNCTION contracts_change_notify()
RETURNS trigger LANGUAGE plpgsql AS
$$ DECLARE
    affected record;
    operation text;
BEGIN
    IF TG_OP = 'DELETE' THEN
        affected := OLD;
        operation := 'delete';
    ELSIF TG_OP = 'INSERT' THEN
        affected := NEW;
        operation := 'insert';
    ELSE
        affected := NEW;
        operation := 'update';
    END IF;
    PERFORM pg_notify('contracts_change', json_build_object(
        'id', affected.id,
        'slug', affected.slug,
        'contractType', affected.type,
        'type', operation,
        'linkData', CASE WHEN affected.type LIKE 'link@%'
            THEN affected.data ELSE NULL END
    )::text);
    RETURN affected;
END $$";

/// The trigger watches the meaningful columns; `links` is write-ignored and
/// `linked_at` changes always accompany a link contract insert that already
/// notified.
pub const CREATE_NOTIFY_TRIGGER: &str = "DO $$ BEGIN
    CREATE TRIGGER \"contracts_change_trigger\"
        AFTER INSERT
        OR UPDATE OF \"slug\", \"type\", \"active\", \"version_major\", \"version_minor\",
            \"version_patch\", \"version_prerelease\", \"version_build\", \"name\",
            \"tags\", \"markers\", \"requires\", \"capabilities\", \"data\", \"updated_at\"
        OR DELETE
        ON \"contracts\"
        FOR EACH ROW EXECUTE FUNCTION contracts_change_notify();
EXCEPTION
    WHEN duplicate_object THEN NULL;
END $$";

/// Baseline indexes. Type contracts can extend these through
/// `data.indexed_fields`.
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS \"contracts_slug_idx\" ON \"contracts\" (\"slug\")",
    "CREATE INDEX IF NOT EXISTS \"contracts_type_idx\" ON \"contracts\" (\"type\")",
    "CREATE INDEX IF NOT EXISTS \"contracts_updated_at_idx\" ON \"contracts\" (\"updated_at\")",
    "CREATE INDEX IF NOT EXISTS \"contracts_created_at_idx\" ON \"contracts\" (\"created_at\" DESC)",
    "CREATE UNIQUE INDEX IF NOT EXISTS \"contracts_versioned_slug_idx\" ON \"contracts\" (\"versioned_slug\")",
    "CREATE INDEX IF NOT EXISTS \"contracts_tags_idx\" ON \"contracts\" USING gin (\"tags\")",
    "CREATE INDEX IF NOT EXISTS \"contracts_data_mirrors_idx\" ON \"contracts\" USING gin ((\"data\" -> 'mirrors') jsonb_path_ops)",
    "CREATE INDEX IF NOT EXISTS \"links2_from_idx\" ON \"links2\" (\"fromId\", \"name\", \"toId\")",
    "CREATE INDEX IF NOT EXISTS \"links2_to_idx\" ON \"links2\" (\"toId\", \"name\", \"fromId\")",
];

/// Every setup statement, in dependency order.
pub fn setup_statements() -> Vec<&'static str> {
    let mut statements = vec![
        CREATE_CONTRACTS_TABLE,
        CREATE_LINKS_TABLE,
        CREATE_STRINGS_TABLE,
        CREATE_COMPOSITE_TYPES,
        CREATE_ARRAY_TO_STRING_FN,
        CREATE_MERGE_VIEWS_FN,
        CREATE_NOTIFY_FN,
        CREATE_NOTIFY_TRIGGER,
    ];
    statements.extend_from_slice(ALTER_CONTRACTS_STORAGE);
    statements.extend_from_slice(CREATE_INDEXES);
    statements
}
