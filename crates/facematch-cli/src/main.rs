use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::ImageRef;
use facematch_engine::{
    BatchOutcome, Engine, EngineConfig, Photo, ProfileRecords, ProgressEvent,
};
use facematch_io::{FsImageLoader, SidecarDetector};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facematch", about = "Face profile enrollment and photo matching")]
struct Cli {
    /// TOML config file; FACEMATCH_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Profile database (defaults to $XDG_DATA_HOME/facematch/profiles.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory relative image paths are resolved against
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a profile from reference images, replacing any existing one
    Enroll {
        owner: String,
        #[arg(required = true)]
        images: Vec<String>,
    },
    /// Add reference images to a profile
    Add {
        owner: String,
        #[arg(required = true)]
        images: Vec<String>,
    },
    /// Remove reference images from a profile
    Remove {
        owner: String,
        #[arg(required = true)]
        images: Vec<String>,
    },
    /// Drop low-quality observations from a profile
    Optimize {
        owner: String,
        #[arg(long, default_value_t = 0.6)]
        min_quality: f32,
    },
    /// Delete a profile
    Delete { owner: String },
    /// Show one profile, or list all
    Show { owner: Option<String> },
    /// Match photos against a profile
    Match {
        owner: String,
        #[arg(required = true)]
        photos: Vec<String>,
        /// Override the distance threshold for this run
        #[arg(long)]
        threshold: Option<f32>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print quality diagnostics for every face in an image
    Assess { image: String },
    /// Compare the best faces of two images
    Compare { a: String, b: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env(),
    };
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    let db_path = config.db_path();

    let fs = match cli.root {
        Some(root) => FsImageLoader::with_root(root),
        None => FsImageLoader::new(),
    };
    let engine = Engine::start(SidecarDetector::new(fs.clone()), fs, config)?;
    let records = ProfileRecords::open(&db_path)
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;

    match cli.command {
        Commands::Enroll { owner, images } => {
            let profile = engine.store.create_profile(&owner, &to_refs(&images)).await?;
            records.save(profile.metadata()).await?;
            println!(
                "Enrolled {owner}: {} faces from {} images",
                profile.face_count(),
                profile.metadata().image_count
            );
        }
        Commands::Add { owner, images } => {
            restore(&engine, &records, &owner).await?;
            let profile = engine.store.add_observations(&owner, &to_refs(&images)).await?;
            records.save(profile.metadata()).await?;
            println!("{owner}: {} faces", profile.face_count());
        }
        Commands::Remove { owner, images } => {
            restore(&engine, &records, &owner).await?;
            let profile = engine.store.remove_observations(&owner, &to_refs(&images)).await?;
            records.save(profile.metadata()).await?;
            println!("{owner}: {} faces", profile.face_count());
        }
        Commands::Optimize { owner, min_quality } => {
            restore(&engine, &records, &owner).await?;
            let before = engine.store.get_profile(&owner).await.map(|p| p.face_count());
            let profile = engine.store.optimize(&owner, min_quality).await?;
            records.save(profile.metadata()).await?;
            if before == Some(profile.face_count()) {
                println!("{owner}: unchanged ({} faces)", profile.face_count());
            } else {
                println!("{owner}: {} faces after optimization", profile.face_count());
            }
        }
        Commands::Delete { owner } => {
            engine.store.delete_profile(&owner).await;
            if records.delete(&owner).await? {
                println!("Deleted {owner}");
            } else {
                println!("No profile for {owner}");
            }
        }
        Commands::Show { owner: Some(owner) } => match records.load(&owner).await? {
            Some(metadata) => println!("{}", serde_json::to_string_pretty(&metadata)?),
            None => bail!("no profile for {owner}"),
        },
        Commands::Show { owner: None } => {
            let all = records.list().await?;
            if all.is_empty() {
                println!("No profiles enrolled");
            }
            for m in all {
                println!(
                    "{:<24} faces={:<3} images={:<3} mean_quality={:.2} updated={}",
                    m.owner_id,
                    m.face_count,
                    m.image_count,
                    m.mean_quality,
                    m.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Match {
            owner,
            photos,
            threshold,
            json,
        } => {
            restore(&engine, &records, &owner).await?;
            if let Some(t) = threshold {
                engine.matcher.set_distance_threshold(t);
            }
            run_match(&engine, &owner, &photos, json).await?;
        }
        Commands::Assess { image } => {
            let observations = engine.matcher.assess_image(&ImageRef::new(image.as_str())).await?;
            if observations.is_empty() {
                println!("No faces detected in {image}");
            }
            for (i, obs) in observations.iter().enumerate() {
                let m = obs.quality_metrics();
                println!(
                    "face {i}: score={:.3} accepted={} strategy={} size={:.0} size_ok={} confidence_ok={} landmarks_ok={} descriptor_ok={} sharpness={:.2} frontality={:.2} eyes_open={}",
                    obs.quality_score(),
                    obs.accepted(),
                    obs.strategy,
                    obs.face_size(),
                    m.size_ok,
                    m.confidence_ok,
                    m.landmarks_ok,
                    m.descriptor_ok,
                    m.sharpness,
                    m.frontality,
                    m.eyes_open,
                );
            }
        }
        Commands::Compare { a, b } => {
            let pair = engine
                .matcher
                .compare_images(&ImageRef::new(a.as_str()), &ImageRef::new(b.as_str()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&pair)?);
        }
    }

    Ok(())
}

fn to_refs(paths: &[String]) -> Vec<ImageRef> {
    paths.iter().map(|p| ImageRef::new(p.as_str())).collect()
}

/// Bring a persisted profile back into the in-process store.
async fn restore(engine: &Engine, records: &ProfileRecords, owner: &str) -> Result<()> {
    if engine.store.has_profile(owner).await {
        return Ok(());
    }
    let Some(metadata) = records.load(owner).await? else {
        bail!("no profile for {owner}; run `facematch enroll` first");
    };
    engine
        .store
        .restore(&metadata)
        .await
        .with_context(|| format!("rebuilding profile for {owner}"))?;
    Ok(())
}

async fn run_match(engine: &Engine, owner: &str, photos: &[String], json: bool) -> Result<()> {
    let photos: Vec<Photo> = photos
        .iter()
        .map(|p| Photo::from(ImageRef::new(p.as_str())))
        .collect();

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = engine.progress_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Processing { current, total, photo_id, eta_ms } => {
                    let eta = eta_ms.map(|ms| format!(" eta {}s", ms / 1000)).unwrap_or_default();
                    eprintln!("[{current}/{total}] {photo_id}{eta}");
                }
                ProgressEvent::Completed { total_matches, average_confidence, elapsed_ms, failed_photos } => {
                    eprintln!(
                        "done: {total_matches} matches, avg confidence {average_confidence:.2}, {failed_photos} failed, {elapsed_ms} ms"
                    );
                }
                ProgressEvent::Cancelled { processed, total } => {
                    eprintln!("cancelled after {processed}/{total}");
                }
                _ => {}
            }
        }
    });

    let outcome = engine.matcher.match_all(&photos, owner, Some(&tx), &cancel).await;
    drop(tx);
    let _ = printer.await;

    match outcome? {
        BatchOutcome::Cancelled => bail!("matching cancelled"),
        BatchOutcome::Completed(matches) if json => {
            println!("{}", serde_json::to_string_pretty(&matches)?);
        }
        BatchOutcome::Completed(matches) => {
            for m in &matches {
                println!(
                    "{}\tconfidence={:.3}\tdistance={:.3}{}",
                    m.photo_id,
                    m.result.confidence,
                    m.result.distance,
                    if m.result.matched { "" } else { "\t(no match)" }
                );
            }
        }
    }
    Ok(())
}
