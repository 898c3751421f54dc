//! Protocol constants for the legacy wire protocol.

/// Size of the standard message header (length, request id, response to, op code).
pub const MESSAGE_HEADER_SIZE: usize = 16;

/// Size of the `OP_REPLY` fields that follow the standard header.
pub const REPLY_FIELDS_SIZE: usize = 20;

/// Total size of an `OP_REPLY` header.
pub const REPLY_HEADER_SIZE: usize = MESSAGE_HEADER_SIZE + REPLY_FIELDS_SIZE;

/// Largest message the client accepts from a server.
pub const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

/// Reply to a client request.
pub const OP_REPLY: i32 = 1;

/// Query a collection (also used to run commands).
pub const OP_QUERY: i32 = 2004;

/// Fetch the next batch of a cursor.
pub const OP_GET_MORE: i32 = 2005;

/// Tell the server the client is done with some cursors.
pub const OP_KILL_CURSORS: i32 = 2007;

// Reply flags.

/// The cursor id requested in a get-more is not known to the server.
pub const REPLY_CURSOR_NOT_FOUND: i32 = 1;

/// The query failed; the single returned document holds `$err`.
pub const REPLY_QUERY_FAILURE: i32 = 1 << 1;

/// The server supports the await-data query option.
pub const REPLY_AWAIT_CAPABLE: i32 = 1 << 3;

// Query flags.

/// Tailable cursor.
pub const QUERY_TAILABLE_CURSOR: i32 = 1 << 1;

/// Allow the query to run against a replica-set secondary.
pub const QUERY_SLAVE_OK: i32 = 1 << 2;

/// Do not time out idle cursors.
pub const QUERY_NO_CURSOR_TIMEOUT: i32 = 1 << 4;

/// Block on a tailable cursor waiting for data.
pub const QUERY_AWAIT_DATA: i32 = 1 << 5;

/// Stream all results without waiting for get-more requests.
pub const QUERY_EXHAUST: i32 = 1 << 6;

/// Return partial results from a sharded cluster if some shards are down.
pub const QUERY_PARTIAL: i32 = 1 << 7;
