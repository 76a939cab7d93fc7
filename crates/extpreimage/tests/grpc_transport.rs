use std::time::Duration;

use extpreimage::{
    ConnectionMode, ExtPreimageClient, ExtPreimageConfig, Preimage, PreimageRequest,
    PreimageRetriever, RetrievalError, TemporaryError,
};

fn unreachable_config(mode: ConnectionMode) -> ExtPreimageConfig {
    let mut config = ExtPreimageConfig::new("127.0.0.1:1", "bitcoin").with_mode(mode);
    config.connect_timeout = Duration::from_millis(500);
    config
}

#[tokio::test]
async fn unreachable_service_is_a_temporary_failure() -> anyhow::Result<()> {
    for mode in [ConnectionMode::Single, ConnectionMode::Pooled] {
        let client = ExtPreimageClient::new(unreachable_config(mode))?;
        let preimage = Preimage::from_bytes(rand::random());
        let request = PreimageRequest::new(preimage.payment_hash(), 1_000);

        let result = client.retrieve(&request).await;
        assert!(
            matches!(
                result,
                Err(RetrievalError::Temporary(TemporaryError::Connection(_)))
            ),
            "{mode:?}: expected a temporary connection error, got {result:?}"
        );
        client.stop().await;
    }
    Ok(())
}

#[tokio::test]
async fn client_is_usable_through_the_retriever_trait() -> anyhow::Result<()> {
    let client = ExtPreimageClient::new(unreachable_config(ConnectionMode::Pooled))?;
    let retriever: &dyn PreimageRetriever = &client;

    let request = PreimageRequest::new(Preimage::from_bytes(rand::random()).payment_hash(), 1);
    let error = retriever
        .retrieve(&request)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected retrieval to fail"))?;
    assert!(error.is_temporary());

    retriever.stop().await;
    retriever.stop().await;
    Ok(())
}

#[test]
fn construction_fails_for_unsupported_chain() {
    let config = ExtPreimageConfig::new("127.0.0.1:1", "dogecoin");
    assert!(ExtPreimageClient::new(config).is_err());
}
