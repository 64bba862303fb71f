// Rules module - 规则模块
// 规则模型、增量缓存与加载器

pub mod cache;
pub mod loader;
pub mod model;
