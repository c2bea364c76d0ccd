pub mod decoder;

pub use decoder::{
    DecodeTxError, EncodeTxError, decode_base64_transaction, deserialize_transaction,
    encode_base64_transaction, serialize_transaction,
};
