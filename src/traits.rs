/// Per-vertex display colors of a brain surface.
pub trait VertexColor {
    /// Three u8 values per vertex.
    fn vertex_color_rgb(&self) -> Vec<u8>;
    /// Four u8 values per vertex.
    fn vertex_color_rgba(&self) -> Vec<u8>;
}
