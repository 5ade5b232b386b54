//! Walk a data file through the vault lifecycle (setup, reload, rotate, disable)

use std::sync::Arc;
use tempfile::TempDir;
use vault_core::{JsonFileStore, ServerInput, Vault};

#[tokio::main]
async fn main() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let data_file = temp_dir.path().join("polarops-data.json");

    println!("=== Phase 1: Add a server and enable the vault ===");
    let id = {
        let vault = Vault::open(Arc::new(JsonFileStore::with_path(&data_file)))
            .await
            .expect("Failed to open data file");

        let id = vault
            .servers
            .add_server(ServerInput {
                host: "10.0.0.5".to_string(),
                username: "ops".to_string(),
                password: Some("s3cret".to_string()),
                ..Default::default()
            })
            .await
            .expect("Failed to add server");

        let report = vault.setup("correct horse").await.expect("Failed to set up vault");
        println!("Encrypted {} credentials", report.sealed);

        let raw = std::fs::read_to_string(&data_file).expect("Failed to read data file");
        println!("Plaintext on disk: {}", raw.contains("s3cret"));
        id
    };

    println!("\n=== Phase 2: Reload and unlock ===");
    {
        let vault = Vault::open(Arc::new(JsonFileStore::with_path(&data_file)))
            .await
            .expect("Failed to open data file");
        println!("State after reload: {:?}", vault.state().await);

        let sealed = vault.get_decrypted_password(id).await;
        println!("Locked read returns envelope: {}", sealed.map(|s| s.expose().contains(':')).unwrap_or(false));

        vault.unlock("correct horse").await.expect("Failed to unlock");
        let password = vault.get_decrypted_password(id).await.expect("Password missing");
        println!("Unlocked read: {}", password.expose());

        println!("\n=== Phase 3: Rotate the master password ===");
        let report = vault
            .change_master_password("correct horse", "battery staple")
            .await
            .expect("Failed to change master password");
        println!("Re-encrypted {} credentials", report.rotated);
        println!("Old password rejected: {}", vault.unlock("correct horse").await.is_err());

        println!("\n=== Phase 4: Disable ===");
        let report = vault.disable("battery staple").await.expect("Failed to disable vault");
        println!("Decrypted {} credentials", report.unsealed);
        println!("State: {:?}", vault.state().await);
    }

    let raw = std::fs::read_to_string(&data_file).expect("Failed to read data file");
    if raw.contains("s3cret") && !raw.contains("\"vault\"") {
        println!("\n✓ Credentials restored to plaintext");
    } else {
        println!("\n!!! Unexpected data file contents !!!");
    }
}
