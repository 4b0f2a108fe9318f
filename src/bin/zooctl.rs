//! Command-line probe for an inference server.
//!
//! Pings the server, lists the model zoo, and optionally runs one
//! single-shot prediction against the first model:
//!
//! ```text
//! zooctl <server> [frame-file]
//! ```

use inferstream::{Result, connect};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let server = args.next().unwrap_or_else(|| "localhost:8778".to_string());
    let frame_file = args.next();

    let mut client = connect(&server).await?;
    println!("connected to {}", client.address());

    let alive = client.ping(1, true).await?;
    println!("ping: {}", if alive { "ok" } else { "no answer" });

    let models = client.modelzoo_list().await?;
    println!("{} model(s) in the zoo", models.len());
    for model in &models {
        println!(
            "  {} ({} on {})",
            model.name,
            model.extended_params.output_postprocess_type(),
            model.extended_params.device_type(),
        );
    }

    if let (Some(path), Some(model)) = (frame_file, models.first()) {
        let frame = std::fs::read(&path)?;
        println!("predicting {} bytes with '{}'", frame.len(), model.name);

        client.open_stream(&model.name, 4, None).await?;
        let result = client.predict(&[frame.into()]).await?;
        println!("{result:#}");
        client.close_stream().await?;
    }

    Ok(())
}
