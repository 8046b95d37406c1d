//! Static model catalog and tier queries.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{Result, RoutingError};

/// Static description of an available model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Name understood by the inference backend.
    pub name: String,
    pub display_name: String,
    /// Parameter count class such as `"3B"` or `"16B"`.
    pub size_class: String,
    /// Quantization label such as `"Q4"`, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// RAM needed to run the model comfortably.
    pub ram_mb: u64,
    /// Layers the model wants offloaded to the GPU.
    pub gpu_layers: u32,
    #[serde(default)]
    pub requires_gpu: bool,
    pub context_window: u32,
}

impl ModelDescriptor {
    /// Parameter count in billions parsed from the size class; unknown classes count as zero.
    pub fn parameters_billions(&self) -> f64 {
        self.size_class
            .trim()
            .trim_end_matches(['B', 'b'])
            .parse()
            .unwrap_or(0.0)
    }

    fn size_order(&self, other: &Self) -> Ordering {
        self.parameters_billions()
            .total_cmp(&other.parameters_billions())
            .then(self.ram_mb.cmp(&other.ram_mb))
    }

    fn cpu_order(&self, other: &Self) -> Ordering {
        self.requires_gpu
            .cmp(&other.requires_gpu)
            .then(self.gpu_layers.cmp(&other.gpu_layers))
            .then(self.ram_mb.cmp(&other.ram_mb))
    }

    fn has_quantization(&self, quantization: &str) -> bool {
        self.quantization
            .as_deref()
            .is_some_and(|label| label.eq_ignore_ascii_case(quantization))
    }
}

/// Read-only, non-empty set of models the router may choose from.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: default_models(),
        }
    }
}

impl ModelCatalog {
    /// Builds a catalog.
    ///
    /// # Errors
    /// Returns [`RoutingError::EmptyCatalog`] when `models` is empty.
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self> {
        if models.is_empty() {
            return Err(RoutingError::EmptyCatalog);
        }
        Ok(Self { models })
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn find(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|model| model.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn pick(&self, prefer: impl Fn(&ModelDescriptor, &ModelDescriptor) -> bool) -> &ModelDescriptor {
        self.models
            .iter()
            .fold(&self.models[0], |best, model| if prefer(model, best) { model } else { best })
    }

    pub fn smallest(&self) -> &ModelDescriptor {
        self.pick(|candidate, best| candidate.size_order(best) == Ordering::Less)
    }

    pub fn largest(&self) -> &ModelDescriptor {
        self.pick(|candidate, best| candidate.size_order(best) == Ordering::Greater)
    }

    /// Smallest model strictly between the smallest and largest size classes.
    ///
    /// With a quantization label, matching mid-tier models are preferred. Falls
    /// back to the smallest model when the catalog has no middle tier.
    pub fn mid_tier(&self, quantization: Option<&str>) -> &ModelDescriptor {
        let low = self.smallest().parameters_billions();
        let high = self.largest().parameters_billions();
        let middle: Vec<&ModelDescriptor> = self
            .models
            .iter()
            .filter(|model| {
                let size = model.parameters_billions();
                size > low && size < high
            })
            .collect();

        let preferred: Vec<&ModelDescriptor> = quantization
            .map(|label| {
                middle
                    .iter()
                    .copied()
                    .filter(|model| model.has_quantization(label))
                    .collect()
            })
            .unwrap_or_default();
        let pool = if preferred.is_empty() { middle } else { preferred };

        pool.into_iter()
            .min_by(|left, right| left.size_order(right))
            .unwrap_or_else(|| self.smallest())
    }

    /// Model that needs the least GPU help.
    pub fn most_cpu_friendly(&self) -> &ModelDescriptor {
        self.pick(|candidate, best| candidate.cpu_order(best) == Ordering::Less)
    }

    /// Models ordered from smallest to largest.
    pub fn by_size(&self) -> Vec<&ModelDescriptor> {
        let mut models: Vec<&ModelDescriptor> = self.models.iter().collect();
        models.sort_by(|left, right| left.size_order(right));
        models
    }

    /// Other catalog models: smaller ones from the closest down, then larger ones from the closest up.
    ///
    /// A model outside the catalog falls back to the smallest entry.
    pub fn fallbacks_for(&self, selected: &str) -> Vec<String> {
        let ordered = self.by_size();
        let Some(position) = ordered.iter().position(|model| model.name == selected) else {
            let smallest = &self.smallest().name;
            return if smallest == selected { Vec::new() } else { vec![smallest.clone()] };
        };
        let smaller = ordered[..position].iter().rev();
        let larger = ordered[position + 1..].iter();
        smaller.chain(larger).map(|model| model.name.clone()).collect()
    }
}

/// The local models shipped in the default configuration.
pub fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            name: "llama3.2:3b".to_owned(),
            display_name: "Llama 3.2 3B".to_owned(),
            size_class: "3B".to_owned(),
            quantization: None,
            capabilities: vec!["chat".to_owned(), "fast".to_owned()],
            ram_mb: 4_000,
            gpu_layers: 0,
            requires_gpu: false,
            context_window: 8_192,
        },
        ModelDescriptor {
            name: "qwen2.5-coder:7b-instruct-q4_K_M".to_owned(),
            display_name: "Qwen 2.5 Coder 7B (Q4)".to_owned(),
            size_class: "7B".to_owned(),
            quantization: Some("Q4".to_owned()),
            capabilities: vec!["chat".to_owned(), "code".to_owned()],
            ram_mb: 6_000,
            gpu_layers: 16,
            requires_gpu: false,
            context_window: 32_768,
        },
        ModelDescriptor {
            name: "qwen2.5-coder:7b-instruct-q5_K_M".to_owned(),
            display_name: "Qwen 2.5 Coder 7B (Q5)".to_owned(),
            size_class: "7B".to_owned(),
            quantization: Some("Q5".to_owned()),
            capabilities: vec!["chat".to_owned(), "code".to_owned()],
            ram_mb: 7_000,
            gpu_layers: 20,
            requires_gpu: false,
            context_window: 32_768,
        },
        ModelDescriptor {
            name: "deepseek-coder-v2:16b".to_owned(),
            display_name: "DeepSeek Coder V2 16B".to_owned(),
            size_class: "16B".to_owned(),
            quantization: None,
            capabilities: vec!["chat".to_owned(), "code".to_owned(), "reasoning".to_owned()],
            ram_mb: 12_000,
            gpu_layers: 40,
            requires_gpu: true,
            context_window: 65_536,
        },
    ]
}
