use crate::application::render::ReportPipeline;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: ReportPipeline,
}
