mod record;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Record)] derive macro
// ============================================================================

/// Derive macro for the `Record` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Record)]
/// #[record(store = "channel_follows")]
/// struct ChannelFollow {
///     #[record(key)]
///     pub user_id: String,
///     #[record(key)]
///     pub channel_username: String,
///     pub followed_at: i64,
/// }
/// ```
///
/// - `#[record(store = "...")]` sets the store name.
///   If omitted, defaults to snake_case struct name + "s".
/// - `#[record(key)]` marks a key field. One marker gives a simple key,
///   several markers give a composite key in declaration order.
///   If no field is marked, a field named `id` is used.
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    record::derive_record(input)
}
