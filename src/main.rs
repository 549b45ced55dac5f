use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use growcery_scan::auth::{register, AuthProvider, RestAuthProvider, SignUp};
use growcery_scan::classify::Classifier;
use growcery_scan::config::Config;
use growcery_scan::lists::{apply_saved, CropList, ProduceList};
use growcery_scan::media::CameraBackend;
use growcery_scan::models::{Profile, UserRole};
use growcery_scan::persistence::{MemoryRecordStore, RecordStore, RestRecordStore};
use growcery_scan::still_camera::StillImageBackend;
use growcery_scan::ScanScreen;

/// Runs one scan through the capture, classification and review pipeline.
#[derive(Parser, Debug)]
#[command(name = "growcery-scan", version, about)]
struct Args {
    /// Configuration file (defaults to growcery_config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image served as the camera frame; a test pattern is used otherwise
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Role used with --dry-run
    #[arg(long, default_value = "consumer")]
    role: UserRole,

    /// Keep records in memory instead of the hosted backend
    #[arg(long)]
    dry_run: bool,

    #[arg(long, env = "GROWCERY_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "GROWCERY_PASSWORD")]
    password: Option<String>,

    /// Create the account first, using this first name for the profile
    #[arg(long, value_name = "FIRST_NAME")]
    sign_up: Option<String>,

    /// Rename the item before saving
    #[arg(long)]
    name: Option<String>,

    /// Discard the result instead of saving it
    #[arg(long)]
    discard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("Starting Growcery scan");

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };

    let camera: Arc<dyn CameraBackend> = match &args.image {
        Some(path) => Arc::new(StillImageBackend::from_file(path)?),
        None => Arc::new(StillImageBackend::test_pattern(
            config.camera.pattern_width,
            config.camera.pattern_height,
        )),
    };

    let mut classifier = Classifier::from_config(&config.classifier)
        .context("Failed to build classification client")?;

    let (store, profile): (Arc<dyn RecordStore>, Profile) = if args.dry_run {
        let profile = Profile {
            user_id: "local".to_string(),
            first_name: "Local".to_string(),
            last_name: None,
            email: "local@localhost".to_string(),
            user_type: args.role,
            location: None,
        };
        (Arc::new(MemoryRecordStore::new()), profile)
    } else {
        let email = args.email.as_deref().context("--email is required without --dry-run")?;
        let password = args.password.as_deref().context("--password is required without --dry-run")?;

        let auth = RestAuthProvider::new(&config.backend);
        let session = match &args.sign_up {
            Some(first_name) => {
                let request = SignUp {
                    email: email.to_string(),
                    password: password.to_string(),
                    first_name: first_name.clone(),
                    last_name: None,
                };
                register(&auth, &request, |session| {
                    let store: Arc<dyn RecordStore> =
                        Arc::new(RestRecordStore::new(&config.backend).with_access_token(&session.access_token));
                    store
                })
                .await
                .context("Sign up failed")?
            }
            None => auth.sign_in(email, password).await.context("Sign in failed")?,
        };
        classifier.set_bearer_token(Some(session.access_token.clone()));

        let store = RestRecordStore::new(&config.backend).with_access_token(&session.access_token);
        let profile = store
            .get_profile(&session.user_id)
            .await
            .context("Failed to load profile")?;
        (Arc::new(store), profile)
    };

    info!("Scanning as {} ({})", profile.email, profile.user_type);

    let mut produce = ProduceList::new(Arc::clone(&store), &profile.user_id);
    let mut crops = CropList::new(Arc::clone(&store), &profile.user_id);
    if let Err(e) = produce.refresh().await {
        warn!("Produce list unavailable: {}", e);
    }
    if let Err(e) = crops.refresh().await {
        warn!("Crop list unavailable: {}", e);
    }

    let mut screen = ScanScreen::mount(&config.camera, camera, classifier, store, profile).await;
    if !screen.session().is_active() {
        anyhow::bail!("Camera unavailable: {}", screen.status_message);
    }

    let opened = screen.scan().await;
    if let Err(e) = opened {
        screen.unmount();
        anyhow::bail!("{}: {}", screen.status_message, e);
    }

    if let Some(pending) = screen.pending() {
        println!("{}", serde_json::to_string_pretty(&pending.result)?);
    }

    if let Some(name) = &args.name {
        screen.rename(name);
    }

    if args.discard {
        screen.discard();
    } else if let Some(saved) = screen.save().await? {
        info!("Saved record: {:?}", saved);
        apply_saved(saved, &mut produce, &mut crops);
    }
    println!("{}", screen.status_message);
    println!("{} produce, {} crops", produce.items().len(), crops.items().len());

    screen.unmount();
    info!("Scan finished");
    Ok(())
}
