use posthog_flags::{ClientConfig, FeatureFlagCalled};

#[tokio::main]
async fn main() -> posthog_flags::Result<()> {
    env_logger::init();

    let api_key = std::env::var("POSTHOG_API_KEY").unwrap();
    let personal_api_key = std::env::var("POSTHOG_PERSONAL_API_KEY").unwrap();

    let client = ClientConfig::from_api_key(api_key)
        .personal_api_key(personal_api_key)
        .feature_flag_called_callback(|event: FeatureFlagCalled| {
            println!("Flag called: {:?}", event);
        })
        .to_client()?;

    // Wait for flag definitions. Until they're loaded, evaluations return the default.
    client.wait_for_feature_flags().await?;

    let enabled = client
        .is_feature_enabled("hey", "630516e9-15bf-41c2-87b4-d0233a3d7ba0", false)
        .await?;

    println!("Enabled: {:?}", enabled);

    client.shutdown();
    Ok(())
}
