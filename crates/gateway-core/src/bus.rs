//! Worker bus vocabulary.

use crate::clients::Client;

#[allow(non_camel_case_types)]
#[derive(Debug)]
pub enum Message {
    SHUTDOWN,
    /// A raw hub line (payload + terminator) to fan out to every client.
    HUB_LINE(Vec<u8>),
    /// A freshly accepted client to add to the pool.
    CLIENT(Client),
    /// A client whose read side ended; remove and close it.
    DEREGISTER(String),
}
