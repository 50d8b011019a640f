//! Interactive demo stage driven by deferred events

use filterkit_core::{
    capability, Bundle, EventHandlers, Flow, InstantiationError, PropertyValue, Registry, Stage,
    StageError, StageList, StageListProvider, StageRegistration,
};
use tracing::info;

pub const SAVE_IMAGE: &str = "save_image";
pub const PRINT_GREETING: &str = "print_greeting";

/// Handles events posted to the interactor
///
/// - `save_image` asks whether to continue; anything but "y" cancels the run
/// - `print_greeting` logs a greeting
///
/// As a list provider it builds `TestPattern -> ShowImage -> QueryDemo`.
#[derive(Debug)]
pub struct QueryDemo {
    events: EventHandlers,
}

impl Default for QueryDemo {
    fn default() -> Self {
        let events = EventHandlers::new()
            .on(SAVE_IMAGE, |bundle: &mut Bundle| {
                let interactor = bundle.interactor()?;
                if !interactor.confirm("Continue?") {
                    bundle.cancel();
                }
                Ok(())
            })
            .on(PRINT_GREETING, |_: &mut Bundle| {
                info!("Hello from QueryDemo!");
                Ok(())
            });
        Self { events }
    }
}

impl QueryDemo {
    pub fn create(_args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        Ok(Box::new(Self::default()))
    }
}

impl Stage for QueryDemo {
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError> {
        let interactor = bundle.interactor()?;
        interactor.execute_pending_events(&*self, bundle)?;
        Ok(Flow::Continue)
    }

    fn events(&self) -> Option<&EventHandlers> {
        Some(&self.events)
    }

    fn list_provider(&self) -> Option<&dyn StageListProvider> {
        Some(self)
    }
}

impl StageListProvider for QueryDemo {
    fn create_stage_list(&self, registry: &Registry) -> Result<StageList, InstantiationError> {
        let mut list = StageList::new();
        list.push(registry.create(
            capability::STAGE,
            "toolbox.TestPattern",
            &[
                PropertyValue::Int(320),
                PropertyValue::Int(200),
                PropertyValue::Text("source".into()),
            ],
        )?);
        list.push(registry.create(
            capability::STAGE,
            "toolbox.ShowImage",
            &[PropertyValue::Text("source".into())],
        )?);
        list.push(registry.create(capability::STAGE, "toolbox.QueryDemo", &[])?);
        Ok(list)
    }
}

filterkit_core::submit_stage!(StageRegistration::new("toolbox.QueryDemo", QueryDemo::create)
    .describe("Asks the user on 'save_image' events; also provides a demo pipeline")
    .capabilities(&[capability::STAGE, capability::STAGE_LIST_PROVIDER]));
