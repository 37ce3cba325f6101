// src/drivers/mod.rs
// 仪器总线、Keithley 仪表驱动与 PNG 绘图
pub mod bus;
pub mod error;
pub mod keithley;
pub mod linux_gpib;
pub mod plot;
pub mod prologix;
pub mod sim;
// 公开导出常用类型，方便外部调用
pub use bus::{open_bus, parse_reading, shared, GpibBus, GpibDevice, SharedBus};
pub use error::BenchError;
pub use keithley::{CurrentSource6220, Multimeter2000, Nanovoltmeter2182, SourceMeter2400};
pub use plot::{
    render_scatter3d_png, render_session_png, Mark3d, PlotStyle, ScatterPlot, ScatterSeries,
};
pub use sim::{SampleModel, SimulatedBench};
