//! Construction of the remote services used by the commands.

use conflation_core::{GeoQueryService, MapEditService};
use conflation_data::{OsmApiClient, OsmApiConfig, OverpassClient, OverpassConfig};

use crate::CliError;

/// Builds the query and edit services for a command invocation.
pub(crate) trait ServiceFactory {
    fn query(&self, config: &OverpassConfig) -> Result<Box<dyn GeoQueryService + Sync>, CliError>;

    fn edit(&self, config: &OsmApiConfig) -> Result<Box<dyn MapEditService>, CliError>;
}

/// Connects to Overpass and the OSM API.
pub(crate) struct RemoteServices;

impl ServiceFactory for RemoteServices {
    fn query(&self, config: &OverpassConfig) -> Result<Box<dyn GeoQueryService + Sync>, CliError> {
        Ok(Box::new(OverpassClient::with_config(config.clone())?))
    }

    fn edit(&self, config: &OsmApiConfig) -> Result<Box<dyn MapEditService>, CliError> {
        Ok(Box::new(OsmApiClient::with_config(config.clone())?))
    }
}
