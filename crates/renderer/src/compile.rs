use std::borrow::Cow;

use wgpu::naga::ShaderStage;

/// Which of the three wallpaper uniforms the user shader declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniformSlots {
    pub time: bool,
    pub resolution: bool,
    pub mouse: bool,
}

impl UniformSlots {
    /// Names of the uniforms the shader does not declare.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.time {
            missing.push("time");
        }
        if !self.resolution {
            missing.push("resolution");
        }
        if !self.mouse {
            missing.push("mouse");
        }
        missing
    }
}

/// User fragment shader rewritten for the naga GLSL frontend.
#[derive(Debug, Clone)]
pub struct WrappedShader {
    pub source: String,
    pub uniforms: UniformSlots,
}

pub(crate) fn vertex_module(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("fullscreen quad vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

pub(crate) fn fragment_module(device: &wgpu::Device, wrapped: &WrappedShader) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("loopaper fragment"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(wrapped.source.clone()),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}

pub(crate) fn passthrough_module(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("cached frame passthrough"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(PASSTHROUGH_SHADER_GLSL),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}

/// Produces a Vulkan-style GLSL 450 fragment shader from GLES-style source.
///
/// 1. Drop `#version` and `precision` lines, the `time`/`resolution`/`mouse`
///    uniform declarations and the `uv` varying, remembering which were present.
/// 2. Prepend a header holding the uniform block and macros that alias the
///    GLES names (`gl_FragColor`, `gl_FragCoord`, `uv`, the uniforms) onto it.
/// 3. Append a footer whose `main` sets a bottom-left-origin `gl_FragCoord`
///    and calls the user's renamed `main`.
pub fn wrap_fragment(source: &str) -> WrappedShader {
    let mut uniforms = UniformSlots::default();
    let mut uses_uv = false;
    let mut body = String::with_capacity(source.len());

    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("#version") || trimmed.starts_with("precision ") {
            body.push('\n');
            continue;
        }
        if let Some(declaration) = Declaration::parse(line, &["uniform"]) {
            if let Some(rest) = declaration.without(&["time", "resolution", "mouse"]) {
                uniforms.time |= declaration.declares("time");
                uniforms.resolution |= declaration.declares("resolution");
                uniforms.mouse |= declaration.declares("mouse");
                body.push_str(&rest);
                body.push('\n');
                continue;
            }
        }
        if let Some(declaration) = Declaration::parse(line, &["varying", "in"]) {
            if let Some(rest) = declaration.without(&["uv"]) {
                uses_uv = true;
                body.push_str(&rest);
                body.push('\n');
                continue;
            }
        }
        body.push_str(line);
        body.push('\n');
    }

    let mut header = String::from(HEADER);
    if uniforms.time {
        header.push_str("#define time params._time\n");
    }
    if uniforms.resolution {
        header.push_str("#define resolution params._resolution\n");
    }
    if uniforms.mouse {
        header.push_str("#define mouse params._mouse\n");
    }
    if uses_uv {
        header.push_str("#define uv wallpaper_uv\n");
    }

    WrappedShader {
        source: format!("{header}#line 1\n{body}{FOOTER}"),
        uniforms,
    }
}

/// A single-line `<qualifier> [precision] <type> <name>[, <name>]*;`
/// declaration, with any trailing `//` comment split off.
#[derive(Debug, PartialEq, Eq)]
struct Declaration<'a> {
    prefix: Vec<&'a str>,
    names: Vec<&'a str>,
    comment: &'a str,
}

impl<'a> Declaration<'a> {
    fn parse(line: &'a str, qualifiers: &[&str]) -> Option<Self> {
        let (code, comment) = match line.find("//") {
            Some(index) => line.split_at(index),
            None => (line, ""),
        };
        let statement = code.trim().strip_suffix(';')?;
        let (head, rest) = match statement.split_once(',') {
            Some((head, rest)) => (head, Some(rest)),
            None => (statement, None),
        };

        let mut prefix: Vec<&str> = head.split_whitespace().collect();
        let first = prefix.pop()?;
        if prefix.len() < 2 || !qualifiers.contains(&prefix[0]) {
            return None;
        }
        let mut names = vec![first];
        if let Some(rest) = rest {
            names.extend(rest.split(',').map(str::trim));
        }
        names
            .iter()
            .all(|name| is_identifier(name))
            .then_some(Self {
                prefix,
                names,
                comment,
            })
    }

    fn declares(&self, name: &str) -> bool {
        self.names.contains(&name)
    }

    /// The line with every name in `known` removed, or `None` if it declares
    /// none of them. Empty when nothing but a comment is left.
    fn without(&self, known: &[&str]) -> Option<String> {
        if !self.names.iter().any(|name| known.contains(name)) {
            return None;
        }
        let kept: Vec<&str> = self
            .names
            .iter()
            .copied()
            .filter(|name| !known.contains(name))
            .collect();
        let mut line = String::new();
        if !kept.is_empty() {
            line = format!("{} {};", self.prefix.join(" "), kept.join(", "));
        }
        if !self.comment.is_empty() {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(self.comment);
        }
        Some(line)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Rewrites a Shadertoy `mainImage` shader into the GLES style loopaper
/// expects.
pub fn convert_shadertoy(source: &str) -> String {
    let already_swizzled = source.contains("gl_FragCoord.xy");

    let mut shader = source
        .replace("iResolution", "resolution")
        .replace("iTime", "time")
        .replace("iMouse", "mouse");
    shader = if already_swizzled {
        shader.replace("fragCoord", "gl_FragCoord")
    } else {
        shader.replace("fragCoord", "gl_FragCoord.xy")
    };
    shader = shader.replace("fragColor", "gl_FragColor");

    if let Some(start) = shader.find("void mainImage") {
        if let Some(offset) = shader[start..].find('{') {
            shader.replace_range(start..start + offset, "void main() ");
        }
    }

    format!("{SHADERTOY_PRELUDE}{shader}")
}

const SHADERTOY_PRELUDE: &str = "precision mediump float;
uniform vec2 resolution;
uniform float time;
uniform vec2 mouse;

";

/// Must match `WallpaperUniforms` in `gpu/uniforms.rs`.
const HEADER: &str = r"#version 450
layout(std140, set = 0, binding = 0) uniform WallpaperParams {
    vec2 _resolution;
    vec2 _mouse;
    float _time;
} params;

layout(location = 0) in vec2 wallpaper_uv;
layout(location = 0) out vec4 wallpaper_frag_color;

vec4 wallpaper_frag_coord;
#define gl_FragCoord wallpaper_frag_coord
#define gl_FragColor wallpaper_frag_color
#define main wallpaper_main
";

const FOOTER: &str = r"
#undef main
#undef gl_FragCoord
void main() {
    wallpaper_frag_coord = vec4(
        gl_FragCoord.x,
        params._resolution.y - gl_FragCoord.y,
        gl_FragCoord.z,
        gl_FragCoord.w
    );
    wallpaper_frag_color = vec4(0.0, 0.0, 0.0, 1.0);
    wallpaper_main();
}
";

const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 wallpaper_uv;

const vec2 corners[4] = vec2[4](
    vec2(-1.0, -1.0),
    vec2(1.0, -1.0),
    vec2(-1.0, 1.0),
    vec2(1.0, 1.0)
);

void main() {
    vec2 pos = corners[gl_VertexIndex];
    wallpaper_uv = (pos + vec2(1.0)) * 0.5;
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

const PASSTHROUGH_SHADER_GLSL: &str = r"#version 450
layout(set = 0, binding = 0) uniform texture2D cached_frame;
layout(set = 0, binding = 1) uniform sampler cached_sampler;
layout(location = 0) out vec4 out_color;

void main() {
    out_color = texelFetch(sampler2D(cached_frame, cached_sampler), ivec2(gl_FragCoord.xy), 0);
}
";
