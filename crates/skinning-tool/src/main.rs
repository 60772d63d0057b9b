use std::{env, error::Error, path::PathBuf, process::ExitCode};

use glam::Vec3;
use log::{error, info, warn};
use skinning::{
    asset::{loader::ModelLoadParams, source::DirectorySource},
    loader::{load_clip, load_model},
    model::BakedModel,
    skinning::{cpu::CpuBackend, BakedVertex, DrawTransforms, SkinningBackend},
};

const USAGE: &str = "Usage: skinning-tool <dir> <model> [clip] [frame] [--gpu]";

#[derive(Debug)]
struct Args {
    root: PathBuf,
    model: String,
    clip: Option<String>,
    frame: usize,
    gpu: bool,
}

impl Args {
    fn parse() -> Option<Self> {
        let mut gpu = false;
        let mut positional = Vec::new();
        for arg in env::args().skip(1) {
            if arg == "--gpu" {
                gpu = true;
            } else {
                positional.push(arg);
            }
        }
        let mut positional = positional.into_iter();
        let root = PathBuf::from(positional.next()?);
        let model = positional.next()?;
        let clip = positional.next();
        let frame = match positional.next() {
            Some(frame) => frame.parse().ok()?,
            None => 0,
        };
        Some(Self {
            root,
            model,
            clip,
            frame,
            gpu,
        })
    }
}

fn bounds(vertices: &[BakedVertex]) -> Option<(Vec3, Vec3)> {
    vertices.iter().fold(None, |bounds, vertex| {
        let position = Vec3::from_array(vertex.position);
        Some(match bounds {
            Some((min, max)) => (position.min(min), position.max(max)),
            None => (position, position),
        })
    })
}

fn log_bounds(vertices: &[BakedVertex]) {
    match bounds(vertices) {
        Some((min, max)) => info!("Baked bounds: {} .. {}", min, max),
        None => info!("Baked model has no vertices"),
    }
}

/// Load, pose, draw once and bake.
fn pose_and_bake<B: SkinningBackend>(
    args: &Args,
    backend: &mut B,
) -> Result<BakedModel<B>, Box<dyn Error>> {
    let params = ModelLoadParams::default();
    let mut source = DirectorySource::new(&args.root);
    let mut model = load_model(&mut source, backend, &args.model, &params)?;

    if let Some(name) = &args.clip {
        let clip = load_clip(&mut source, name, &params)?;
        if let Some(skeleton) = model.skeleton_mut() {
            if let Err(err) = clip.evaluate(args.frame, skeleton) {
                warn!("Keeping rest pose: {}", err);
            }
        }
    }
    if let Some(skeleton) = model.skeleton_mut() {
        skeleton.recompute();
    }

    model.draw(backend, &DrawTransforms::default(), None)?;
    let baked = model
        .bake(backend, None)?
        .ok_or("model did not complete loading")?;
    info!("Baked {} vertices", baked.vertex_count());
    Ok(baked)
}

fn run_cpu(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut backend = CpuBackend::new();
    let baked = pose_and_bake(args, &mut backend)?;
    let frame = backend.take_frame();
    info!(
        "Drew {} submeshes, {} vertices",
        frame.len(),
        frame.iter().map(|draw| draw.vertices.len()).sum::<usize>()
    );
    log_bounds(baked.buffer());
    Ok(())
}

#[cfg(feature = "gpu")]
fn run_gpu(args: &Args) -> Result<(), Box<dyn Error>> {
    use std::sync::Arc;

    use pollster::FutureExt;
    use skinning::skinning::gpu::{WgpuBackend, WgpuBackendConfig};
    use wgpu::{
        util::{backend_bits_from_env, initialize_adapter_from_env, power_preference_from_env},
        Backends, DeviceDescriptor, Extent3d, Instance, InstanceDescriptor, PowerPreference,
        RequestAdapterOptions, TextureDescriptor, TextureDimension, TextureUsages,
        TextureViewDescriptor,
    };

    let instance = Instance::new(InstanceDescriptor {
        backends: backend_bits_from_env().unwrap_or(Backends::all()),
        ..Default::default()
    });
    let adapter = match initialize_adapter_from_env(&instance, None) {
        Some(adapter) => adapter,
        None => instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: power_preference_from_env().unwrap_or(PowerPreference::None),
                ..Default::default()
            })
            .block_on()
            .ok_or("no graphics adapter available")?,
    };
    let (device, queue) = adapter
        .request_device(
            &DeviceDescriptor {
                label: Some("Device"),
                ..Default::default()
            },
            None,
        )
        .block_on()?;

    let config = WgpuBackendConfig {
        texture_root: args.root.clone(),
        ..Default::default()
    };
    let size = Extent3d {
        width: 256,
        height: 256,
        depth_or_array_layers: 1,
    };
    let target = |format, label| {
        device
            .create_texture(&TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format,
                usage: TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&TextureViewDescriptor::default())
    };
    let color = target(config.color_format, "Color Target");
    let depth = config
        .depth_format
        .map(|format| target(format, "Depth Target"));

    let mut backend = WgpuBackend::new(Arc::new(device), Arc::new(queue), config);
    let baked = pose_and_bake(args, &mut backend)?;
    backend.finish_frame(&color, depth.as_ref());
    log_bounds(&backend.read_baked(baked.buffer())?);
    Ok(())
}

#[cfg(not(feature = "gpu"))]
fn run_gpu(args: &Args) -> Result<(), Box<dyn Error>> {
    warn!("Built without GPU support, skinning on the CPU");
    run_cpu(args)
}

fn main() -> ExitCode {
    env_logger::init();

    let Some(args) = Args::parse() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };
    let result = if args.gpu {
        run_gpu(&args)
    } else {
        run_cpu(&args)
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bounds() {
        assert_eq!(bounds(&[]), None);
        let vertices = [
            BakedVertex {
                position: [1.0, -2.0, 0.0],
                normal: [0.0, 0.0, 1.0],
            },
            BakedVertex {
                position: [-1.0, 3.0, 0.5],
                normal: [0.0, 0.0, 1.0],
            },
        ];
        assert_eq!(
            bounds(&vertices),
            Some((Vec3::new(-1.0, -2.0, 0.0), Vec3::new(1.0, 3.0, 0.5)))
        );
    }
}
