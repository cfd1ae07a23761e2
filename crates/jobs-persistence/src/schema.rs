// Esquema Diesel de la tabla `jobs` (SQLite).
diesel::table! {
    jobs (id) {
        id -> BigInt,
        kind -> Text,
        queue -> Text,
        args -> Text,
        metadata -> Text,
        state -> Text,
        attempt -> Integer,
        max_attempts -> Integer,
        errors -> Text,
        created_at_ts -> BigInt,
        scheduled_at_ts -> BigInt,
        attempted_at_ts -> Nullable<BigInt>,
        finalized_at_ts -> Nullable<BigInt>,
        timeout_secs -> BigInt,
        unique_key -> Nullable<Text>,
        sequence_key -> Nullable<Text>,
        sequence_concurrent -> Bool,
        sequence_continue_on_discard -> Bool,
    }
}
