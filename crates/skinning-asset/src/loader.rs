#[derive(Debug, Clone)]
pub struct ModelLoadParams {
    pub vertex_extension: String,
    pub model_extension: String,
    pub animation_extension: String,
    /// Rotate root bones by 90 degrees about X to turn the exporter's
    /// y-up skeleton into the renderer's z-up space.
    pub root_correction: bool,
}

impl Default for ModelLoadParams {
    fn default() -> Self {
        Self {
            vertex_extension: String::from("wglvert"),
            model_extension: String::from("wglmodel"),
            animation_extension: String::from("wglanim"),
            root_correction: true,
        }
    }
}

impl ModelLoadParams {
    pub fn vertex_filename(&self, name: &str) -> String {
        format!("{}.{}", name, self.vertex_extension)
    }

    pub fn model_filename(&self, name: &str) -> String {
        format!("{}.{}", name, self.model_extension)
    }

    pub fn animation_filename(&self, name: &str) -> String {
        format!("{}.{}", name, self.animation_extension)
    }
}
