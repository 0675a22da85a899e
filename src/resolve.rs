//! Resolve strategy selection.
//!
//! The set of resolve strategies is closed and small, so dispatch is a
//! plain enum the backends match on rather than compile-time shader
//! polymorphism. Hardware box resolve is used whenever the driver-level
//! `ResolveSubresource` is legal; depth formats and per-sample
//! extraction fall back to a full-screen shader pass because not every
//! hardware/API combination exposes raw per-sample reads as a copy.

use crate::backend::TextureDesc;
use crate::env_config::define_env_flag;
use crate::error::{ReadbackError, ReadbackResult};
use crate::region::ReadRegion;

/// How a resolve operation is executed on the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolveStrategy {
    /// Single-sample source: a plain region copy.
    Copy,
    /// Driver-level box-filter `ResolveSubresource`.
    HardwareBox,
    /// Full-screen pass writing SV_Depth from a multisampled depth
    /// source.
    ShaderDepth,
    /// Full-screen pass copying a single-sample depth source into a
    /// depth target that cannot be copied directly.
    ShaderDepthNonMs,
    /// Full-screen pass extracting one sample plane via
    /// `Texture2DMS.Load(coord, sample_index)`.
    ShaderSingleSample,
}

/// Parameters of one resolve invocation.
///
/// When doing full per-sample MSAA readback the caller issues one
/// resolve per sample index; there is no batched multi-sample call.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolveParams {
    /// Source rectangle; `None` means the full source extent.
    pub source_rect: Option<ReadRegion>,
    /// Destination rectangle; `None` means the full destination
    /// extent. Content outside the rectangle is preserved.
    pub dest_rect: Option<ReadRegion>,
    /// Sample plane to extract. Forces the shader path on MSAA
    /// sources.
    pub sample_index: Option<u32>,
    /// Clear the destination before resolving. Only legal when the
    /// destination rectangle covers the full extent; this is an
    /// explicit opt-in, never inferred from coverage.
    pub clear_dest: bool,
}

define_env_flag!(enabled_when(
    force_shader_resolve,
    "SNOW_READBACK_FORCE_SHADER_RESOLVE"
));

/// Pick the strategy for resolving `src` into `dst`, validating that
/// the pair is resolvable at all.
pub fn choose_strategy(
    src: &TextureDesc,
    dst: &TextureDesc,
    params: &ResolveParams,
) -> ReadbackResult<ResolveStrategy> {
    choose_strategy_with(src, dst, params, force_shader_resolve())
}

pub(crate) fn choose_strategy_with(
    src: &TextureDesc,
    dst: &TextureDesc,
    params: &ResolveParams,
    force_shader: bool,
) -> ReadbackResult<ResolveStrategy> {
    if dst.is_multisampled() {
        return Err(ReadbackError::InvalidConfig(
            "resolve destination must be single-sample".into(),
        ));
    }
    if src.format != dst.format {
        return Err(ReadbackError::InvalidConfig(format!(
            "resolve format mismatch: {} -> {}",
            src.format.name(),
            dst.format.name()
        )));
    }
    if let Some(sample) = params.sample_index {
        if sample >= src.sample_count {
            return Err(ReadbackError::InvalidConfig(format!(
                "sample index {sample} out of range (sample count {})",
                src.sample_count
            )));
        }
    }
    if params.clear_dest {
        let covers = params.dest_rect.is_none_or(|rect| rect.covers(dst));
        if !covers {
            return Err(ReadbackError::InvalidConfig(
                "clear_dest requires the destination rect to cover the full extent".into(),
            ));
        }
    }

    if src.format.is_depth_stencil() {
        return Ok(if src.is_multisampled() {
            ResolveStrategy::ShaderDepth
        } else {
            ResolveStrategy::ShaderDepthNonMs
        });
    }

    if !src.is_multisampled() {
        return Ok(ResolveStrategy::Copy);
    }

    // Per-sample extraction always needs the shader path; so does a
    // typeless destination, which the hardware resolve rejects.
    if params.sample_index.is_some() || dst.format.is_typeless() || force_shader {
        return Ok(ResolveStrategy::ShaderSingleSample);
    }

    Ok(ResolveStrategy::HardwareBox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    fn desc(format: PixelFormat, sample_count: u32) -> TextureDesc {
        let mut d = TextureDesc::new_2d(128, 128, format);
        d.sample_count = sample_count;
        d
    }

    #[test]
    fn msaa_color_with_matching_formats_uses_hardware_resolve() {
        let src = desc(PixelFormat::Rgba8Unorm, 4);
        let dst = desc(PixelFormat::Rgba8Unorm, 1);
        let strategy =
            choose_strategy_with(&src, &dst, &ResolveParams::default(), false).unwrap();
        assert_eq!(strategy, ResolveStrategy::HardwareBox);
    }

    #[test]
    fn explicit_sample_index_forces_shader_extraction() {
        let src = desc(PixelFormat::Rgba8Unorm, 4);
        let dst = desc(PixelFormat::Rgba8Unorm, 1);
        let params = ResolveParams {
            sample_index: Some(2),
            ..Default::default()
        };
        let strategy = choose_strategy_with(&src, &dst, &params, false).unwrap();
        assert_eq!(strategy, ResolveStrategy::ShaderSingleSample);
    }

    #[test]
    fn out_of_range_sample_index_is_rejected() {
        let src = desc(PixelFormat::Rgba8Unorm, 4);
        let dst = desc(PixelFormat::Rgba8Unorm, 1);
        let params = ResolveParams {
            sample_index: Some(4),
            ..Default::default()
        };
        assert!(choose_strategy_with(&src, &dst, &params, false).is_err());
    }

    #[test]
    fn depth_formats_take_the_shader_path() {
        let dst = desc(PixelFormat::Depth24Stencil8, 1);
        let ms = desc(PixelFormat::Depth24Stencil8, 4);
        assert_eq!(
            choose_strategy_with(&ms, &dst, &ResolveParams::default(), false).unwrap(),
            ResolveStrategy::ShaderDepth
        );
        let ss = desc(PixelFormat::Depth24Stencil8, 1);
        assert_eq!(
            choose_strategy_with(&ss, &dst, &ResolveParams::default(), false).unwrap(),
            ResolveStrategy::ShaderDepthNonMs
        );
    }

    #[test]
    fn single_sample_color_degenerates_to_copy() {
        let src = desc(PixelFormat::Bgra8Unorm, 1);
        let dst = desc(PixelFormat::Bgra8Unorm, 1);
        assert_eq!(
            choose_strategy_with(&src, &dst, &ResolveParams::default(), false).unwrap(),
            ResolveStrategy::Copy
        );
    }

    #[test]
    fn typeless_destination_cannot_hardware_resolve() {
        let src = desc(PixelFormat::R16Typeless, 4);
        let dst = desc(PixelFormat::R16Typeless, 1);
        assert_eq!(
            choose_strategy_with(&src, &dst, &ResolveParams::default(), false).unwrap(),
            ResolveStrategy::ShaderSingleSample
        );
    }

    #[test]
    fn multisampled_destination_is_invalid() {
        let src = desc(PixelFormat::Rgba8Unorm, 4);
        let dst = desc(PixelFormat::Rgba8Unorm, 2);
        assert!(matches!(
            choose_strategy_with(&src, &dst, &ResolveParams::default(), false),
            Err(ReadbackError::InvalidConfig(_))
        ));
    }

    #[test]
    fn format_mismatch_is_invalid() {
        let src = desc(PixelFormat::Rgba8Unorm, 4);
        let dst = desc(PixelFormat::Bgra8Unorm, 1);
        assert!(choose_strategy_with(&src, &dst, &ResolveParams::default(), false).is_err());
    }

    #[test]
    fn clear_dest_requires_full_coverage() {
        let src = desc(PixelFormat::Rgba8Unorm, 4);
        let dst = desc(PixelFormat::Rgba8Unorm, 1);
        let partial = ResolveParams {
            clear_dest: true,
            dest_rect: Some(ReadRegion::new(0, 0, 64, 64)),
            ..Default::default()
        };
        assert!(choose_strategy_with(&src, &dst, &partial, false).is_err());

        let full = ResolveParams {
            clear_dest: true,
            dest_rect: Some(ReadRegion::new(0, 0, 128, 128)),
            ..Default::default()
        };
        assert!(choose_strategy_with(&src, &dst, &full, false).is_ok());
    }

    #[test]
    fn forcing_shader_resolve_overrides_hardware_path() {
        let src = desc(PixelFormat::Rgba8Unorm, 4);
        let dst = desc(PixelFormat::Rgba8Unorm, 1);
        assert_eq!(
            choose_strategy_with(&src, &dst, &ResolveParams::default(), true).unwrap(),
            ResolveStrategy::ShaderSingleSample
        );
    }
}
