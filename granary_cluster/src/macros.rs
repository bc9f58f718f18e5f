// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Macro helpers for grain messages

/// Derive [crate::BytesConvertable] for a given prost type, so that it can be
/// used as a grain [granary::Message] or reply.
///
/// Since by Rust's logic, prost::Message could be implemented for any
/// type in the future, this **could** cause a conflicting implementation
/// by defining this generic here, therefore we can't do it for non-concrete types
#[macro_export]
macro_rules! derive_serialization_for_prost_type {
    {$ty:ty} => {
        impl $crate::BytesConvertable for $ty {
            fn into_bytes(self) -> Vec<u8> {
                <Self as $crate::prost::Message>::encode_to_vec(&self)
            }
            fn from_bytes(bytes: Vec<u8>) -> Result<Self, $crate::SerializationErr> {
                <Self as $crate::prost::Message>::decode(bytes.as_slice()).map_err(|err| {
                    $crate::SerializationErr::new(stringify!($ty), err.to_string())
                })
            }
        }
    };
}

#[cfg(test)]
mod test {
    use granary::BytesConvertable;

    use crate::derive_serialization_for_prost_type;

    derive_serialization_for_prost_type! {crate::protocol::membership::Handshake}

    #[test]
    fn test_protobuf_message_serialization() {
        let original = crate::protocol::membership::Handshake {
            known_peers: vec!["10.0.0.1:7000".to_string(), "10.0.0.2:7000".to_string()],
            origin: "10.0.0.3:7000".to_string(),
        };

        let bytes = original.clone().into_bytes();
        let decoded =
            <crate::protocol::membership::Handshake as BytesConvertable>::from_bytes(bytes)
                .unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_malformed_protobuf_is_an_error() {
        let err = <crate::protocol::membership::Handshake as BytesConvertable>::from_bytes(vec![
            0xff, 0xff, 0xff,
        ])
        .unwrap_err();
        assert!(err.to_string().contains("Handshake"));
    }
}
