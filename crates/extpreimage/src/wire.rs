//! Wire contracts for `proto/extpreimage.proto`.
//!
//! Checked in rather than generated at build time so the crate builds
//! without `protoc`. Keep field tags in sync with the `.proto` file.

/// Currency of the requested payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Symbol {
    Btc = 0,
    Ltc = 1,
}

impl Symbol {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Ltc => "LTC",
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPreimageRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub payment_hash: ::prost::alloc::vec::Vec<u8>,
    #[prost(int64, tag = "5")]
    pub amount: i64,
    #[prost(enumeration = "Symbol", tag = "6")]
    pub symbol: i32,
    #[prost(int64, tag = "10")]
    pub time_lock: i64,
    #[prost(int64, tag = "11")]
    pub best_height: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPreimageResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub payment_preimage: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "2")]
    pub permanent_error: ::prost::alloc::string::String,
}

pub mod external_preimage_service_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::codegen::{Body, Bytes, StdError};

    const GET_PREIMAGE_PATH: &str = "/extpreimage.ExternalPreimageService/GetPreimage";

    #[derive(Debug, Clone)]
    pub struct ExternalPreimageServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> ExternalPreimageServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            Self {
                inner: tonic::client::Grpc::new(inner),
            }
        }

        pub async fn get_preimage(
            &mut self,
            request: impl tonic::IntoRequest<super::GetPreimageRequest>,
        ) -> Result<
            tonic::Response<tonic::codec::Streaming<super::GetPreimageResponse>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|error| {
                tonic::Status::unknown(format!("service was not ready: {}", error.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static(GET_PREIMAGE_PATH);
            self.inner
                .server_streaming(request.into_request(), path, codec)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn request_encodes_with_original_field_tags() -> anyhow::Result<()> {
        let request = GetPreimageRequest {
            payment_hash: vec![0xaa; 32],
            amount: 1_000,
            symbol: Symbol::Ltc as i32,
            time_lock: 288,
            best_height: 123_456,
        };
        let bytes = request.encode_to_vec();

        // payment_hash: field 1, length-delimited.
        assert_eq!(bytes[0], 0x0a);
        // amount: field 5, varint.
        assert!(bytes.contains(&(5 << 3)));
        // best_height: field 11, varint.
        assert!(bytes.contains(&(11 << 3)));

        let decoded = GetPreimageRequest::decode(bytes.as_slice())?;
        assert_eq!(decoded.symbol(), Symbol::Ltc);
        assert_eq!(decoded, request);
        Ok(())
    }

    #[test]
    fn empty_response_has_no_permanent_error() -> anyhow::Result<()> {
        let decoded = GetPreimageResponse::decode(&[][..])?;
        assert!(decoded.payment_preimage.is_empty());
        assert!(decoded.permanent_error.is_empty());
        assert_eq!(Symbol::Btc.as_str_name(), "BTC");
        Ok(())
    }
}
