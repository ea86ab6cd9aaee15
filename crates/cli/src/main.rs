use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use clap::{Parser, Subcommand};

use herdwatch_core::capture::infrastructure::ffmpeg_capture::FfmpegCaptureFactory;
use herdwatch_core::config::AppConfig;
use herdwatch_core::detection::domain::detector::{Detection, Detector};
use herdwatch_core::detection::infrastructure::onnx_yolo_detector::OnnxYoloDetector;
use herdwatch_core::embedding::domain::embedder::Embedder;
use herdwatch_core::embedding::infrastructure::onnx_embedder::OnnxEmbedder;
use herdwatch_core::events::domain::identity_event::EventPublisher;
use herdwatch_core::events::infrastructure::event_bus::EventBus;
use herdwatch_core::identity::domain::identity::IdentityId;
use herdwatch_core::identity::domain::identity_store::IdentityStore;
use herdwatch_core::identity::infrastructure::json_file_repository::JsonFileRepository;
use herdwatch_core::pipeline::auto_registrar::{
    AutoRegistrar, RegistrationCandidate, RegistrationOutcome,
};
use herdwatch_core::pipeline::camera_supervisor::CameraSupervisor;
use herdwatch_core::pipeline::camera_worker::WorkerContext;
use herdwatch_core::pipeline::inference_pool::InferencePool;
use herdwatch_core::pipeline::sighting_log::SightingLog;
use herdwatch_core::registration::domain::photo_store::PhotoStore;
use herdwatch_core::registration::infrastructure::http_description_service::HttpDescriptionService;
use herdwatch_core::registration::infrastructure::jpeg_photo_store::JpegPhotoStore;
use herdwatch_core::shared::category::Category;
use herdwatch_core::shared::frame::Frame;
use herdwatch_core::shared::model_resolver;

const RELOAD_POLL: Duration = Duration::from_secs(2);
const EVENT_POLL: Duration = Duration::from_millis(200);

/// Identify cattle and people from farm cameras.
#[derive(Parser)]
#[command(name = "herdwatch")]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Detection confidence threshold (0.0-1.0).
    #[arg(long, global = true)]
    confidence: Option<f64>,

    /// Minimum similarity for a match (0.0-1.0).
    #[arg(long, global = true)]
    similarity: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch every active camera and print identity events as JSON lines.
    Run {
        /// Stop after this many seconds (runs until killed otherwise).
        #[arg(long)]
        duration: Option<u64>,

        /// Process every Nth frame.
        #[arg(long)]
        stride: Option<u32>,
    },
    /// Register a subject from an image file.
    Enroll {
        image: PathBuf,

        /// Name to register under (generated if omitted).
        #[arg(long)]
        name: Option<String>,

        /// Only consider detections of this category: animal or person.
        #[arg(long)]
        category: Option<Category>,
    },
    /// Print registered identities.
    List,
    /// Rename a registered identity.
    Rename { id: u64, name: String },
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(confidence) = cli.confidence {
        config.detection.confidence = confidence;
    }
    if let Some(similarity) = cli.similarity {
        config.matching.similarity_threshold = similarity;
    }

    match cli.command {
        Command::Run { duration, stride } => {
            if let Some(stride) = stride {
                config.worker.frame_stride = stride;
            }
            config.validate()?;
            run_service(config, duration.map(Duration::from_secs))
        }
        Command::Enroll {
            image,
            name,
            category,
        } => {
            config.validate()?;
            run_enroll(&config, &image, name.as_deref(), category)
        }
        Command::List => run_list(&config),
        Command::Rename { id, name } => run_rename(&config, IdentityId(id), &name),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => AppConfig::default_path().ok_or("could not determine config directory")?,
    };
    log::info!("Using configuration {}", path.display());
    Ok(AppConfig::load_or_default(&path)?)
}

fn open_store(config: &AppConfig) -> Result<Arc<IdentityStore>, Box<dyn std::error::Error>> {
    let path = config.storage.identities_path();
    let store = IdentityStore::open(Box::new(JsonFileRepository::new(path.clone())))?;
    log::info!("Loaded {} identities from {}", store.len(), path.display());
    Ok(Arc::new(store))
}

fn build_registrar(
    config: &AppConfig,
    store: Arc<IdentityStore>,
    photos: Arc<dyn PhotoStore>,
    events: Arc<dyn EventPublisher>,
) -> Result<AutoRegistrar, Box<dyn std::error::Error>> {
    let registrar = AutoRegistrar::new(store, photos, events, config.matching.dedup_threshold);
    Ok(match HttpDescriptionService::from_settings(&config.description)? {
        Some(service) => registrar.with_descriptions(Arc::new(service)),
        None => registrar,
    })
}

fn build_models(
    config: &AppConfig,
) -> Result<(Arc<dyn Detector>, Arc<dyn Embedder>), Box<dyn std::error::Error>> {
    log::info!("Resolving model: {}", config.models.detector.name);
    let detector_path =
        model_resolver::resolve(&config.models.detector, Some(Box::new(download_progress)))?;
    log::info!("Resolving model: {}", config.models.embedder.name);
    let embedder_path =
        model_resolver::resolve(&config.models.embedder, Some(Box::new(download_progress)))?;

    let detector = OnnxYoloDetector::new(&detector_path, config.detection.nms_iou)?;
    let embedder = OnnxEmbedder::new(&embedder_path)?;
    Ok((Arc::new(detector), Arc::new(embedder)))
}

fn run_service(
    config: AppConfig,
    duration: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !config.cameras.iter().any(|c| c.active) {
        return Err("no active cameras configured".into());
    }

    let store = open_store(&config)?;
    let (detector, embedder) = build_models(&config)?;
    let photos: Arc<dyn PhotoStore> = Arc::new(JpegPhotoStore::new(config.storage.photos_path()));
    let bus = Arc::new(EventBus::new(
        config.events.capacity,
        config.events.max_consecutive_drops,
    ));
    let subscription = bus.subscribe();
    let registrar = Arc::new(build_registrar(
        &config,
        Arc::clone(&store),
        Arc::clone(&photos),
        bus.clone(),
    )?);

    let context = Arc::new(WorkerContext {
        capture: Arc::new(FfmpegCaptureFactory),
        detector,
        embedder,
        registrar: Arc::clone(&registrar),
        photos,
        events: bus.clone(),
        sightings: Arc::new(SightingLog::new()),
        pool: InferencePool::new(config.inference.pool_size),
    });

    let cameras = config.cameras.clone();
    let identities_path = config.storage.identities_path();
    let supervisor = CameraSupervisor::new(config, context);
    for camera in cameras {
        supervisor.add(camera)?;
    }

    let started = Instant::now();
    let mut last_poll = Instant::now();
    let mut last_modified = modified_at(&identities_path);
    loop {
        match subscription.recv_timeout(EVENT_POLL) {
            Ok(event) => println!("{}", event.to_json()),
            Err(true) => {
                log::warn!("Event stream fell behind and was disconnected");
                break;
            }
            Err(false) => {}
        }

        if last_poll.elapsed() >= RELOAD_POLL {
            last_poll = Instant::now();
            let modified = modified_at(&identities_path);
            if modified != last_modified {
                last_modified = modified;
                match store.reload() {
                    Ok(count) => log::info!("Identities file changed, reloaded {count}"),
                    Err(e) => log::error!("Failed to reload identities: {e}"),
                }
            }
        }

        if duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
    }

    supervisor.stop_all();
    registrar.wait_for_descriptions();
    for status in supervisor.statuses() {
        log::info!("[{}] {}", status.name, status.stats.brief());
    }
    Ok(())
}

fn run_enroll(
    config: &AppConfig,
    image_path: &Path,
    name: Option<&str>,
    category: Option<Category>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !image_path.exists() {
        return Err(format!("Input file not found: {}", image_path.display()).into());
    }
    let frame = load_frame(image_path)?;

    let store = open_store(config)?;
    let (detector, embedder) = build_models(config)?;
    let detections = detector
        .detect(&frame, config.detection.confidence)
        .map_err(|e| e.to_string())?;
    let best = pick_subject(&detections, category).ok_or_else(|| match category {
        Some(c) => format!("no {c} found in {}", image_path.display()),
        None => format!("no person or animal found in {}", image_path.display()),
    })?;

    let rect = best
        .bbox
        .padded_crop(config.detection.crop_padding, frame.width(), frame.height())
        .ok_or("detected subject lies outside the image")?;
    if rect.min_side() < config.detection.min_crop_side {
        return Err(format!(
            "detected {} is too small ({} px), need at least {} px",
            best.category,
            rect.min_side(),
            config.detection.min_crop_side
        )
        .into());
    }
    let crop = frame.crop(&rect);
    let embedding = embedder.embed(&crop).map_err(|e| e.to_string())?;

    let bus = Arc::new(EventBus::new(
        config.events.capacity,
        config.events.max_consecutive_drops,
    ));
    let subscription = bus.subscribe();
    let photos: Arc<dyn PhotoStore> = Arc::new(JpegPhotoStore::new(config.storage.photos_path()));
    let registrar = build_registrar(config, store, photos, bus)?;

    let candidate = RegistrationCandidate {
        crop,
        embedding,
        category: best.category,
        camera: None,
        track_id: None,
    };
    match registrar.confirm(&candidate, name)? {
        RegistrationOutcome::Registered(identity) => {
            registrar.wait_for_descriptions();
            for event in subscription.drain() {
                println!("{}", event.to_json());
            }
            log::info!("Registered {} as {} ({})", identity.category, identity.name, identity.id);
        }
        RegistrationOutcome::Matched(existing) => {
            let name = registrar
                .store()
                .snapshot()
                .get(existing.identity_id)
                .map(|identity| identity.name.clone())
                .unwrap_or_default();
            return Err(format!(
                "already registered as {name} ({}), similarity {:.3}",
                existing.identity_id, existing.similarity
            )
            .into());
        }
    }
    Ok(())
}

fn run_list(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config)?;
    let snapshot = store.snapshot();
    if snapshot.is_empty() {
        println!("No identities registered.");
        return Ok(());
    }
    println!("{:>5}  {:<8}  {:<20}  {:>4}  DETAILS", "ID", "TYPE", "NAME", "EMB");
    for identity in snapshot.iter() {
        let mut details = Vec::new();
        if let Some(breed) = &identity.breed {
            details.push(breed.clone());
        }
        if let Some(kg) = identity.estimated_weight_kg {
            details.push(format!("~{kg:.0} kg"));
        }
        if let Some(photo) = &identity.photo_path {
            details.push(photo.display().to_string());
        }
        println!(
            "{:>5}  {:<8}  {:<20}  {:>4}  {}",
            identity.id,
            identity.category,
            identity.name,
            identity.embeddings().len(),
            details.join(", ")
        );
    }
    Ok(())
}

fn run_rename(
    config: &AppConfig,
    id: IdentityId,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config)?;
    let renamed = store.rename(id, name)?;
    println!("{} is now {}", renamed.id, renamed.name);
    Ok(())
}

/// The most confident detection, optionally restricted to one category.
fn pick_subject(detections: &[Detection], category: Option<Category>) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| category.map_or(true, |c| d.category == c))
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

fn load_frame(path: &Path) -> Result<Frame, Box<dyn std::error::Error>> {
    let rgb = image::open(path)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame::new(rgb.into_raw(), width, height, 3, 0))
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading model... {pct}%");
    } else {
        eprint!("\rDownloading model... {downloaded} bytes");
    }
}
