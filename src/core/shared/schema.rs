diesel::table! {
    tickets (id) {
        id -> Integer,
        submitter_id -> BigInt,
        submitter_handle -> Nullable<Text>,
        full_name -> Text,
        department -> Text,
        category -> Text,
        description -> Text,
        attachment_ref -> Nullable<Text>,
        status -> Text,
        created_at -> Timestamp,
        admin_chat_id -> Nullable<BigInt>,
        admin_message_id -> Nullable<BigInt>,
    }
}
