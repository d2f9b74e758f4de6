use image::{DynamicImage, Rgb, RgbImage};

use mobilesam_rs::mocks::{StubGraphFactory, STUB_EMBEDDING_SHAPE};
use mobilesam_rs::{
    Backend, ErrorKind, ModelKind, Padding, PredictorConfig, PredictorState, PromptSet, Result,
    SamError, SamPredictor, SurfaceFormat,
};

fn predictor(factory: &StubGraphFactory) -> Result<SamPredictor<StubGraphFactory>> {
    SamPredictor::new(factory.clone(), PredictorConfig::default())
}

// width x height
fn image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([120, 60, 30])))
}

#[test]
fn test_predict_before_set_image() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;

    let err = predictor.predict_points(&[10.0, 10.0], &[1.0]).unwrap_err();
    assert!(matches!(err, SamError::ImageNotSet));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(predictor.result().is_none());
    assert_eq!(factory.decoder_runs(), 0);
    Ok(())
}

#[test]
fn test_result_has_original_dimensions() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;

    // 1024 rows, 512 columns
    predictor.set_image(&image(512, 1024))?;
    predictor.predict_points(&[256.0, 128.0], &[1.0])?;

    let result = predictor.result().unwrap();
    assert_eq!((result.height(), result.width()), (1024, 512));

    let call = factory.last_decoder_call().unwrap();
    assert_eq!(call.orig_im_size, vec![1024.0, 512.0]);
    assert_eq!(call.point_coords, vec![256.0, 128.0]);
    assert_eq!(call.point_labels, vec![1.0]);
    assert_eq!(call.embedding_shape, STUB_EMBEDDING_SHAPE.to_vec());
    assert_eq!(call.mask_input_shape, vec![1, 1, 256, 256]);
    assert_eq!(call.has_mask_input, vec![0.0]);

    assert_eq!(result.value(256, 128), Some(255));
    assert_eq!(result.value(500, 1000), Some(0));
    Ok(())
}

#[test]
fn test_prompt_points_are_mapped_to_encoder_space() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;

    // 480 rows, 640 columns -> 768 x 1024
    predictor.set_image(&image(640, 480))?;
    predictor.predict_points(&[640.0, 480.0, 320.0, 0.0], &[1.0, 0.0])?;

    let call = factory.last_decoder_call().unwrap();
    assert_eq!(call.point_coords.len(), 4);
    for (mapped, expected) in call.point_coords.iter().zip([1024.0, 768.0, 512.0, 0.0]) {
        assert!((mapped - expected).abs() < 1e-3, "{mapped} vs {expected}");
    }
    assert_eq!(factory.encoder_inputs(), vec![vec![768, 1024, 3]]);
    Ok(())
}

#[test]
fn test_embedding_is_reused_across_predictions() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;

    predictor.set_image(&image(300, 200))?;
    predictor.predict_points(&[50.0, 50.0], &[1.0])?;
    let first = predictor.result().unwrap().clone();

    predictor.predict_points(&[250.0, 150.0], &[1.0])?;
    let second = predictor.result().unwrap().clone();

    predictor.predict_points(&[50.0, 50.0], &[1.0])?;
    let third = predictor.result().unwrap().clone();

    assert_ne!(first, second);
    assert_eq!(first.as_raw(), third.as_raw());
    assert_eq!(factory.encoder_runs(), 1);
    assert_eq!(factory.decoder_runs(), 3);
    Ok(())
}

#[test]
fn test_mismatched_prompt_lengths() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(64, 64))?;

    let err = predictor
        .predict_points(&[1.0, 2.0, 3.0, 4.0], &[1.0])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(factory.decoder_runs(), 0);
    Ok(())
}

#[test]
fn test_backend_switch_invalidates_embedding() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(64, 32))?;
    assert_eq!(predictor.state(), PredictorState::ImageSet);

    predictor.set_backend(Backend::Cuda { device_id: 0 })?;
    assert_eq!(predictor.state(), PredictorState::NoImage);
    assert_eq!(predictor.backend(), Backend::Cuda { device_id: 0 });

    let err = predictor.predict(&PromptSet::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    let created = factory.created_graphs();
    assert_eq!(created.len(), 4);
    assert_eq!(
        &created[2..],
        &[
            (ModelKind::Encoder, Backend::Cuda { device_id: 0 }),
            (ModelKind::Decoder, Backend::Cuda { device_id: 0 }),
        ]
    );

    predictor.set_image(&image(64, 32))?;
    predictor.predict(&PromptSet::default())?;
    assert_eq!(factory.encoder_runs(), 2);
    Ok(())
}

#[test]
fn test_same_backend_is_a_no_op() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(16, 16))?;

    predictor.set_backend(Backend::Cpu)?;
    assert_eq!(predictor.state(), PredictorState::ImageSet);
    assert_eq!(factory.created_graphs().len(), 2);
    Ok(())
}

#[test]
fn test_empty_prompt_set() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(40, 20))?;

    predictor.predict_points(&[], &[])?;

    let call = factory.last_decoder_call().unwrap();
    assert!(call.point_coords.is_empty());
    assert!(call.point_labels.is_empty());
    let result = predictor.result().unwrap();
    assert_eq!((result.width(), result.height()), (40, 20));
    assert_eq!(result.coverage(), 1.0);
    assert_eq!(predictor.scores(), &[0.9]);
    Ok(())
}

#[test]
fn test_unsupported_prompts_are_rejected() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(40, 20))?;

    let prompts = PromptSet::new(vec![1.0, 1.0], vec![1.0]).with_box([0.0, 0.0, 10.0, 10.0]);
    let err = predictor.predict(&prompts).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(factory.decoder_runs(), 0);
    Ok(())
}

#[test]
fn test_failed_decode_keeps_previous_result() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(100, 100))?;
    predictor.predict_points(&[10.0, 10.0], &[1.0])?;
    let before = predictor.result().unwrap().clone();

    factory.set_fail_decoder(true);
    let err = predictor.predict_points(&[90.0, 90.0], &[1.0]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(predictor.result(), Some(&before));

    factory.set_fail_decoder(false);
    factory.set_mask_size(Some((50, 100)));
    assert!(predictor.predict_points(&[90.0, 90.0], &[1.0]).is_err());
    assert_eq!(predictor.result(), Some(&before));
    assert_eq!(predictor.state(), PredictorState::ImageSet);
    Ok(())
}

#[test]
fn test_result_reallocated_on_size_change() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;

    predictor.set_image(&image(30, 20))?;
    predictor.predict(&PromptSet::default())?;
    assert_eq!(predictor.result().map(|r| r.width()), Some(30));

    predictor.set_image(&image(50, 60))?;
    let result = predictor.result().unwrap();
    assert_eq!((result.width(), result.height()), (50, 60));
    assert_eq!(result.coverage(), 0.0);
    assert!(predictor.scores().is_empty());
    Ok(())
}

#[test]
fn test_dispose() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(16, 16))?;

    predictor.dispose();
    assert_eq!(predictor.state(), PredictorState::Disposed);
    assert!(predictor.result().is_none());

    assert!(matches!(
        predictor.predict(&PromptSet::default()),
        Err(SamError::Disposed)
    ));
    assert!(matches!(
        predictor.set_image(&image(16, 16)),
        Err(SamError::Disposed)
    ));
    assert!(matches!(
        predictor.set_backend(Backend::Cuda { device_id: 0 }),
        Err(SamError::Disposed)
    ));
    Ok(())
}

#[test]
fn test_missing_assets_are_configuration_errors() {
    let factory = StubGraphFactory::new().with_missing(ModelKind::Decoder);
    let err = predictor(&factory).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let factory = StubGraphFactory::new().without_decoder_input("orig_im_size");
    let err = predictor(&factory).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("orig_im_size"));
}

#[test]
fn test_square_padding_and_rgba_surface() -> Result<()> {
    let factory = StubGraphFactory::new();
    let config = PredictorConfig {
        padding: Padding::Square,
        surface_format: SurfaceFormat::Rgba8,
        ..PredictorConfig::default()
    };
    let mut predictor = SamPredictor::new(factory.clone(), config)?;

    predictor.set_image(&image(200, 100))?;
    predictor.predict_points(&[100.0, 50.0], &[1.0])?;

    assert_eq!(factory.encoder_inputs(), vec![vec![1024, 1024, 3]]);
    let result = predictor.result().unwrap();
    assert_eq!(result.format(), SurfaceFormat::Rgba8);
    assert_eq!(result.as_raw().len(), 200 * 100 * 4);
    assert_eq!(result.value(100, 50), Some(255));
    Ok(())
}

#[test]
fn test_logits_are_exposed_for_every_mask() -> Result<()> {
    let factory = StubGraphFactory::new();
    factory.set_mask_count(3);
    let mut predictor = predictor(&factory)?;
    assert!(predictor.logits().is_none());

    // 60 rows, 80 columns
    predictor.set_image(&image(80, 60))?;
    predictor.predict_points(&[10.0, 10.0], &[1.0])?;

    let logits = predictor.logits().unwrap();
    assert_eq!(logits.shape(), &[1, 3, 60, 80]);
    assert_eq!(logits[[0, 0, 10, 10]], 1.0);
    assert_eq!(logits[[0, 2, 10, 10]], 3.0);
    assert_eq!(logits[[0, 1, 59, 79]], -2.0);
    assert_eq!(
        predictor.low_res_logits().map(|l| l.shape().to_vec()),
        Some(vec![1, 3, 256, 256])
    );
    assert_eq!(predictor.scores().len(), 3);

    // the surface is channel 0 thresholded
    let result = predictor.result().unwrap();
    assert_eq!(result.value(10, 10), Some(255));
    assert_eq!(result.value(79, 59), Some(0));
    Ok(())
}

#[test]
fn test_failed_decode_keeps_previous_logits() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(100, 100))?;
    predictor.predict_points(&[10.0, 10.0], &[1.0])?;
    let before = predictor.logits().unwrap().clone();
    let low_res_before = predictor.low_res_logits().unwrap().clone();

    factory.set_fail_decoder(true);
    assert!(predictor.predict_points(&[90.0, 90.0], &[1.0]).is_err());
    assert_eq!(predictor.logits(), Some(&before));

    factory.set_fail_decoder(false);
    factory.set_mask_size(Some((50, 100)));
    assert!(predictor.predict_points(&[90.0, 90.0], &[1.0]).is_err());
    assert_eq!(predictor.logits(), Some(&before));
    assert_eq!(predictor.low_res_logits(), Some(&low_res_before));
    assert_eq!(predictor.scores(), &[0.9]);
    Ok(())
}

#[test]
fn test_new_image_clears_logits() -> Result<()> {
    let factory = StubGraphFactory::new();
    let mut predictor = predictor(&factory)?;
    predictor.set_image(&image(30, 20))?;
    predictor.predict(&PromptSet::default())?;
    assert!(predictor.logits().is_some());

    predictor.set_image(&image(30, 20))?;
    assert!(predictor.logits().is_none());
    assert!(predictor.low_res_logits().is_none());

    predictor.predict(&PromptSet::default())?;
    predictor.dispose();
    assert!(predictor.logits().is_none());
    Ok(())
}
