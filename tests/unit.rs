//! Unit tests for core Bunkatsu functionality.
//!
//! Tests individual components in isolation without full pipeline execution.

use bunkatsu::error::{Error, Result};
use bunkatsu::materializer::GroupMaterializer;
use bunkatsu::planner;
use bunkatsu::prelude::*;

mod common;
use common::{
    cleanup_test_dirs, create_comic_fixture, create_dummy_image, page_color, setup_test_dirs,
    zip_entry_names,
};

#[tokio::test]
async fn test_settings_builder_validation() -> Result<()> {
    let result = Settings::builder().default_image_height(0u32).build();
    assert!(result.is_err());
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("Default image height")
    );

    let mut profile = PerformanceProfile::balanced();
    profile.batch_size = 0;
    assert!(Settings::builder().performance(profile).build().is_err());

    let settings = Settings::builder().build()?;
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.default_resize(), ResizeMode::ToHeight(2048));
    Ok(())
}

#[tokio::test]
async fn test_job_builder_validation_and_defaults() -> Result<()> {
    let settings = Settings::builder()
        .include_cover(false)
        .output_format(OutputFormat::Cb7)
        .build()?;

    let spec = settings.job_builder().comic_name("Comic").build()?;
    assert!(!spec.include_cover);
    assert!(spec.include_metadata);
    assert_eq!(spec.output_format, OutputFormat::Cb7);
    assert_eq!(spec.strategy, SplitStrategy::Whole);
    assert!(spec.is_passthrough());

    // Missing or blank name
    assert!(settings.job_builder().build().is_err());
    assert!(settings.job_builder().comic_name("  ").build().is_err());
    // Out of range parameters
    assert!(
        settings
            .job_builder()
            .comic_name("Comic")
            .image_quality(101u8)
            .build()
            .is_err()
    );
    assert!(
        settings
            .job_builder()
            .comic_name("Comic")
            .resize(ResizeMode::ToHeight(0))
            .build()
            .is_err()
    );

    let spec = settings
        .job_builder()
        .comic_name("Comic")
        .resize(ResizeMode::ToRatio(100))
        .build()?;
    assert!(spec.is_passthrough());
    Ok(())
}

#[tokio::test]
async fn test_buffer_root_location() -> Result<()> {
    let settings = Settings::builder()
        .buffer_directory(PathBuf::from("/tmp/buffers"))
        .build()?;
    let source = Path::new("/library/My Comic.cbz");
    assert_eq!(
        settings.buffer_root(source, "My: Comic"),
        PathBuf::from("/tmp/buffers/My- Comic")
    );

    let settings = Settings::builder().use_file_dir_as_buffer(true).build()?;
    assert_eq!(
        settings.buffer_root(source, "Comic"),
        PathBuf::from("/library/Comic")
    );
    Ok(())
}

/// Writes `count` pages named `page{i}.jpg` into `dir` and collects them.
async fn collected_pages(dir: &Path, count: usize) -> Result<PageSet> {
    for i in 1..=count {
        create_dummy_image(&dir.join(format!("page{}.jpg", i)), page_color(i)).await;
    }
    tokio::fs::write(dir.join("ComicInfo.xml"), "<ComicInfo/>").await?;
    Collector::new(dir).build().await
}

#[tokio::test]
async fn test_materializer_names_and_moves_pages() -> Result<()> {
    let dirs = setup_test_dirs("materializer_names").await;
    let pages = collected_pages(&dirs.source_dir, 5).await?;
    let spec = ArchiveJobSpec::builder()
        .comic_name("Vol 1")
        .strategy(SplitStrategy::ByCount(2))
        .build()?;
    let plan = planner::plan(spec.strategy.planner().as_ref(), &pages, &spec)?;
    assert_eq!(plan.groups[0].pages, vec![0, 1]);
    assert_eq!(plan.groups[1].pages, vec![2, 3, 4]);

    let mut materializer = GroupMaterializer::new(
        Arc::new(ImageCrateCodec),
        Arc::new(pages),
        Arc::new(plan),
        Arc::new(spec),
        &dirs.buffer_dir,
        CancellationToken::new(),
    );
    materializer.stage_cover().await?;

    let first = materializer.materialize(0, None).await?;
    assert_eq!(first, dirs.buffer_dir.join("Vol 1_01"));
    assert!(first.join("Vol_1_01.jpg").exists());
    assert!(first.join("Vol_1_02.jpg").exists());
    assert!(first.join("ComicInfo.xml").exists());
    // Passthrough moves the pages out of the source tree.
    assert!(!dirs.source_dir.join("page1.jpg").exists());

    let second = materializer.materialize(1, None).await?;
    for sequence in 1..=4 {
        assert!(second.join(format!("Vol_1_{:02}.jpg", sequence)).exists());
    }
    // The cover copy matches the first page even though its source was moved.
    assert_eq!(
        std::fs::read(second.join("Vol_1_01.jpg"))?,
        std::fs::read(first.join("Vol_1_01.jpg"))?
    );

    cleanup_test_dirs(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_materializer_failure_removes_group_dir() -> Result<()> {
    let dirs = setup_test_dirs("materializer_failure").await;
    let pages = collected_pages(&dirs.source_dir, 4).await?;
    let spec = ArchiveJobSpec::builder()
        .comic_name("Comic")
        .strategy(SplitStrategy::ByCount(2))
        .include_cover(false)
        .image_quality(90u8)
        .build()?;
    let plan = planner::plan(spec.strategy.planner().as_ref(), &pages, &spec)?;

    // The last page of the second group disappears before materialization.
    std::fs::remove_file(dirs.source_dir.join("page4.jpg"))?;

    let materializer = GroupMaterializer::new(
        Arc::new(ImageCrateCodec),
        Arc::new(pages),
        Arc::new(plan),
        Arc::new(spec),
        &dirs.buffer_dir,
        CancellationToken::new(),
    );
    let controller =
        BatchController::new(PerformanceProfile::balanced(), CancellationToken::new());
    let result = materializer.materialize(1, Some(&controller)).await;
    assert!(matches!(
        result,
        Err(Error::PartialWriteAbort { group: 1, .. })
    ));
    assert!(!materializer.group_dir(1).exists());

    // The untouched group still works.
    let first = materializer.materialize(0, Some(&controller)).await?;
    assert!(first.join("Comic_01.jpg").exists());
    assert!(first.join("Comic_02.jpg").exists());

    cleanup_test_dirs(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_materializer_rejects_unknown_group() -> Result<()> {
    let dirs = setup_test_dirs("materializer_unknown").await;
    let pages = collected_pages(&dirs.source_dir, 2).await?;
    let spec = ArchiveJobSpec::builder().comic_name("Comic").build()?;
    let plan = planner::plan(&planner::SingleGroup, &pages, &spec)?;
    let materializer = GroupMaterializer::new(
        Arc::new(ImageCrateCodec),
        Arc::new(pages),
        Arc::new(plan),
        Arc::new(spec),
        &dirs.buffer_dir,
        CancellationToken::new(),
    );
    assert!(matches!(
        materializer.materialize(3, None).await,
        Err(Error::InvalidParameter(_))
    ));

    cleanup_test_dirs(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_zip_archiver_extract_and_compress() -> Result<()> {
    let dirs = setup_test_dirs("zip_archiver").await;
    let archive = dirs.source_dir.join("Comic.cbz");
    create_comic_fixture(&archive, "p", 3, &[("sub/ComicInfo.xml", "<ComicInfo/>")]);
    let archiver = ZipArchiver::new();

    let extracted = dirs.buffer_dir.join("extracted");
    archiver.extract(&archive, &extracted).await?;
    assert!(extracted.join("p1.jpg").exists());
    assert!(extracted.join("sub/ComicInfo.xml").exists());

    let repacked = dirs.target_dir.join("Repacked.cbz");
    archiver
        .compress(&extracted, &repacked, OutputFormat::Cbz)
        .await?;
    assert_eq!(
        zip_entry_names(&repacked),
        vec!["p1.jpg", "p2.jpg", "p3.jpg", "sub/ComicInfo.xml"]
    );

    assert!(matches!(
        archiver
            .compress(&extracted, &dirs.target_dir.join("Repacked.cb7"), OutputFormat::Cb7)
            .await,
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        archiver
            .extract(&dirs.source_dir.join("missing.cbz"), &extracted)
            .await,
        Err(Error::NotFound(_))
    ));

    // Garbage input surfaces as a tool failure.
    let broken = dirs.source_dir.join("broken.cbz");
    std::fs::write(&broken, "not a zip")?;
    assert!(matches!(
        archiver.extract(&broken, &extracted).await,
        Err(Error::ExternalToolFailure { .. })
    ));

    cleanup_test_dirs(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_collector_merges_roots_in_order() -> Result<()> {
    let dirs = setup_test_dirs("collector_many").await;
    let first = dirs.source_dir.join("archive_01");
    let second = dirs.source_dir.join("archive_02");
    create_dummy_image(&first.join("z.jpg"), page_color(1)).await;
    create_dummy_image(&second.join("a.jpg"), page_color(2)).await;
    create_dummy_image(&second.join("b.png"), page_color(3)).await;

    let pages = Collector::build_many(&dirs.source_dir, vec![first, second]).await?;
    let names: Vec<String> = pages.images.iter().map(|p| p.file_name()).collect();
    assert_eq!(names, vec!["z.jpg", "a.jpg", "b.png"]);
    assert_eq!(pages.root, dirs.source_dir);
    assert_eq!(pages.images[2].extension, ".png");

    cleanup_test_dirs(&dirs).await;
    Ok(())
}

#[tokio::test]
async fn test_batch_controller_keeps_input_order() -> Result<()> {
    for profile in [
        PerformanceProfile::low_resource(),
        PerformanceProfile::balanced(),
        PerformanceProfile::high_performance(),
    ] {
        let controller = BatchController::new(profile, CancellationToken::new());
        let doubled = controller
            .try_run((0..12u64).collect(), |n| async move {
                tokio::time::sleep(std::time::Duration::from_millis(12 - n)).await;
                Ok(n * 2)
            })
            .await?;
        assert_eq!(doubled, (0..12u64).map(|n| n * 2).collect::<Vec<_>>());
    }
    Ok(())
}
