//! Style registry - immutable mapping from style keys to generation parameters

use serde::Serialize;

/// Shared negative prompt applied when a style does not define its own.
pub const NEGATIVE_PROMPT_BASE: &str = "signature,poor body structure,low-quality drawing,incorrect size,outside the edges,unclear,dull background,logo,cropped,trimmed,body parts separated,uneven size,twisted,copy,duplicated elements,additional arms,additional fingers,additional hands,additional legs,additional body parts,flaw,imperfection,joined fingers,unpleasant size,identifying sign,incorrect structure,wrong proportion,tacky,poor quality,poor clarity,spot,absent arms,absent fingers,absent hands,absent legs,error,damaged,beyond the image,badly drawn face,badly drawn feet,badly drawn hands,text on paper,repulsive,narrow eyes,visual plan,arrangement,cut off,unpleasant,blurry,unattractive,awkward position,imaginary framework,watermark,worst quality,low contrast,username,text,bad anatomy,bad hands,missing fingers,extra digit,fewer digits,jpeg artifacts,bad feet,extra fingers,mutated hands,poorly drawn hands,bad proportions,extra limbs,disfigured,gross proportions,malformed limbs,missing arms,missing legs,extra arms,extra legs,fused fingers,too many fingers,long neck,sign,underwear,sexy,lewd,nsfw,exhibitionism,no body,no legs,no hands,missing body parts,un human,monster,amputee,unrealistic items,gender change,different gender,changed gender,altered gender,different person,wrong face,different face,face swap";

/// Registry-wide fallback denoise strength, used only when a style defines
/// no explicit default.
pub const RECOMMENDED_DENOISING_STRENGTH: f64 = 0.22;

/// Generation parameters for one character style
#[derive(Debug, Clone)]
pub struct StyleConfig {
    /// Stable string identifier used by callers
    pub key: String,
    /// Localized display name
    pub name: String,
    /// English display name
    pub name_en: String,
    /// Short human-readable description
    pub description: String,
    /// Positive prompt text
    pub prompt: String,
    /// Per-style negative prompt; `None` falls back to the shared base
    pub negative_prompt: Option<String>,
    /// Default denoise strength in [0,1]; `None` falls back to the
    /// registry-wide recommendation
    pub denoise: Option<f64>,
}

/// Display metadata exposed by the listing operation. Prompt text is
/// deliberately not part of this view.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StyleInfo {
    pub key: String,
    pub name: String,
    pub name_en: String,
    pub description: String,
}

/// Immutable style registry with a designated default style
pub struct StyleRegistry {
    styles: Vec<StyleConfig>,
    default_key: String,
}

impl StyleRegistry {
    /// Build a registry from explicit styles. The default key must name one
    /// of the supplied styles.
    pub fn new(styles: Vec<StyleConfig>, default_key: &str) -> Self {
        assert!(
            styles.iter().any(|s| s.key == default_key),
            "default style '{}' is not in the registry",
            default_key
        );
        Self {
            styles,
            default_key: default_key.to_string(),
        }
    }

    /// Resolve a style key. Unknown keys fall back to the default style
    /// rather than failing.
    pub fn get(&self, key: &str) -> &StyleConfig {
        self.styles
            .iter()
            .find(|s| s.key == key)
            .unwrap_or_else(|| {
                self.styles
                    .iter()
                    .find(|s| s.key == self.default_key)
                    .expect("default style is always present")
            })
    }

    /// List styles in registry order, exposing display metadata only.
    pub fn list(&self) -> Vec<StyleInfo> {
        self.styles
            .iter()
            .map(|s| StyleInfo {
                key: s.key.clone(),
                name: s.name.clone(),
                name_en: s.name_en.clone(),
                description: s.description.clone(),
            })
            .collect()
    }

    /// Registry-wide fallback denoise strength.
    pub fn recommended_strength(&self) -> f64 {
        RECOMMENDED_DENOISING_STRENGTH
    }

    /// Shared negative prompt base.
    pub fn negative_base(&self) -> &str {
        NEGATIVE_PROMPT_BASE
    }

    /// Key of the designated default style.
    pub fn default_key(&self) -> &str {
        &self.default_key
    }
}

impl Default for StyleRegistry {
    /// The built-in character style set.
    fn default() -> Self {
        let styles = vec![
            StyleConfig {
                key: "real_bubblehead".to_string(),
                name: "리얼 (버블헤드)".to_string(),
                name_en: "Real (Bubble Head)".to_string(),
                description: "실사풍 큰 머리 캐릭터".to_string(),
                prompt: "full body portrait,bubble head,big head small body,realistic skin texture,photorealistic style,cute proportions,same person,same face,preserve original features,high definition,4k,high quality".to_string(),
                negative_prompt: None,
                denoise: Some(0.10),
            },
            StyleConfig {
                key: "semi_realistic".to_string(),
                name: "반실사 (3D)".to_string(),
                name_en: "Semi-Realistic (3D)".to_string(),
                description: "3D 애니메이션 스타일".to_string(),
                prompt: "full body portrait,3d rendered character,semi realistic,stylized,expressive eyes,pixar style,high quality 3d art,same person,same face,preserve original features,high definition,4k,high quality".to_string(),
                negative_prompt: None,
                denoise: Some(0.20),
            },
            StyleConfig {
                key: "character".to_string(),
                name: "캐릭터".to_string(),
                name_en: "Character".to_string(),
                description: "동화풍 캐릭터 스타일".to_string(),
                prompt: "full body portrait,fairy tale style,magical character,storybook illustration,whimsical,expressive eyes,vibrant colors,same person,same face,preserve original features,high definition,4k,high quality".to_string(),
                negative_prompt: None,
                denoise: Some(0.30),
            },
        ];
        Self::new(styles, "real_bubblehead")
    }
}
